//! Console output from sandboxed JavaScript.
//!
//! The render engine captures `console.*` calls into [`ConsoleOutput`]; the
//! hydration verifier streams them through a [`ConsoleSink`]. Both end up in
//! `tracing` by default.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

/// Receives console lines from a sandbox.
pub type ConsoleSink = Arc<dyn Fn(ConsoleLevel, &str) + Send + Sync>;

/// Captured console output from one render
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    pub fn push(&mut self, level: ConsoleLevel, msg: &str) {
        match level {
            ConsoleLevel::Log => self.logs.push(msg.to_string()),
            ConsoleLevel::Warn => self.warns.push(msg.to_string()),
            ConsoleLevel::Error => self.errors.push(msg.to_string()),
        }
    }

    /// Send everything captured to `sink`, logs first.
    pub fn forward(&self, sink: &dyn Fn(ConsoleLevel, &str)) {
        for log in &self.logs {
            sink(ConsoleLevel::Log, log);
        }
        for warn in &self.warns {
            sink(ConsoleLevel::Warn, warn);
        }
        for err in &self.errors {
            sink(ConsoleLevel::Error, err);
        }
    }
}

/// Write a console line to `tracing` under the sandbox target.
pub fn trace_console(level: ConsoleLevel, msg: &str) {
    match level {
        ConsoleLevel::Log => tracing::info!(target: "ssr_pipeline::sandbox", "{msg}"),
        ConsoleLevel::Warn => tracing::warn!(target: "ssr_pipeline::sandbox", "{msg}"),
        ConsoleLevel::Error => tracing::error!(target: "ssr_pipeline::sandbox", "{msg}"),
    }
}

/// The host console: a sink backed by [`trace_console`].
pub fn host_sink() -> ConsoleSink {
    Arc::new(trace_console)
}
