//! Render engine runtime - executes the server bundle in a sandboxed V8 isolate.
//!
//! The isolate only gets what a server render needs:
//! - console.log/warn/error (captured, forwarded to tracing by the caller)
//! - fetch() against an origin allow-list
//! - module loading from the server bundle directory only
//! - No fs, net, env, or other system access

use crate::console::{ConsoleLevel, ConsoleOutput};
use crate::fetch::{op_fetch, FetchConfig};
use crate::loader::BundleLoader;
use anyhow::{anyhow, Error};
use deno_core::{op2, JsRuntime, ModuleSpecifier, OpState, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

/// Result of running the bundle's render function
#[derive(Debug)]
pub struct EngineOutput {
    /// Application markup returned by the bundle
    pub app: String,
    /// The context as the bundle left it
    pub context: serde_json::Value,
}

#[derive(Deserialize)]
struct RawOutput {
    app: String,
    context: serde_json::Value,
}

// ============================================================================
// Console Ops
// ============================================================================

fn capture(state: &mut OpState, level: ConsoleLevel, msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.push(level, msg);
    }
}

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    capture(state, ConsoleLevel::Log, msg);
}

#[op2(fast)]
fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    capture(state, ConsoleLevel::Warn, msg);
}

#[op2(fast)]
fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    capture(state, ConsoleLevel::Error, msg);
}

deno_core::extension!(
    ssr_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_fetch,
    ],
    esm_entry_point = "ext:ssr_runtime/bootstrap.js",
    esm = ["ext:ssr_runtime/bootstrap.js" = "src/bootstrap.js"],
);

/// Configuration for the render engine sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory containing the server bundle (only this dir is importable)
    pub bundle_dir: PathBuf,
    /// Maximum heap size in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for a single render in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
    /// Allow-list for fetch() (no origins = fetch disabled)
    pub fetch: FetchConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("."),
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
            timeout_ms: Some(30_000),              // 30 seconds default
            fetch: FetchConfig::default(),
        }
    }
}

/// Create a sandboxed JS runtime for rendering.
pub fn create_runtime(config: &SandboxConfig) -> Result<JsRuntime, Error> {
    let loader = BundleLoader::new(&config.bundle_dir)?;

    let create_params = config.max_heap_size.map(|max_bytes| {
        deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes)
    });

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![ssr_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    if config.max_heap_size.is_some() {
        runtime.add_near_heap_limit_callback(|current, initial| {
            // Keep the limit so V8 raises an OOM error instead of growing
            tracing::warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "render engine near heap limit"
            );
            current
        });
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());
    runtime.op_state().borrow_mut().put(config.fetch.clone());

    Ok(runtime)
}

/// Run the bundle's render function for one context.
///
/// The entry module must export `render(context)` (named or default). It
/// returns the application markup, sync or async, and may mutate `context`.
pub async fn execute_render(
    runtime: &mut JsRuntime,
    entry_point: &Path,
    context: serde_json::Value,
    timeout_ms: Option<u64>,
) -> Result<EngineOutput, Error> {
    let Some(ms) = timeout_ms else {
        return execute_render_inner(runtime, entry_point, context).await;
    };

    // A watchdog thread terminates the isolate if the render overruns
    let isolate_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = {
        let timed_out = timed_out.clone();
        std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(Duration::from_millis(ms)) {
                timed_out.store(true, Ordering::SeqCst);
                isolate_handle.terminate_execution();
            }
        })
    };

    let result = execute_render_inner(runtime, entry_point, context).await;

    let _ = done_tx.send(());
    let _ = watchdog.join();

    if timed_out.load(Ordering::SeqCst) {
        // Make the isolate usable for the next render
        runtime.v8_isolate().cancel_terminate_execution();
        return Err(anyhow!("Render timed out after {}ms", ms));
    }
    result
}

async fn execute_render_inner(
    runtime: &mut JsRuntime,
    entry_point: &Path,
    context: serde_json::Value,
) -> Result<EngineOutput, Error> {
    let entry_path = entry_point
        .canonicalize()
        .map_err(|e| anyhow!("Invalid entry point '{}': {}", entry_point.display(), e))?;

    let module_specifier = ModuleSpecifier::from_file_path(&entry_path)
        .map_err(|_| anyhow!("Failed to create module specifier"))?;

    let render_code = format!(
        "globalThis.__ssr_internal_render__({}, {})",
        serde_json::to_string(module_specifier.as_str())?,
        serde_json::to_string(&context)?
    );

    let result_global = runtime.execute_script("<ssr>", render_code)?;

    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    let json = {
        let scope = &mut runtime.handle_scope();
        let local = deno_core::v8::Local::new(scope, &result_global);

        let promise = deno_core::v8::Local::<deno_core::v8::Promise>::try_from(local)
            .map_err(|_| anyhow!("Render entry did not return a promise"))?;
        match promise.state() {
            deno_core::v8::PromiseState::Fulfilled => {
                promise.result(scope).to_rust_string_lossy(scope)
            }
            deno_core::v8::PromiseState::Rejected => {
                let exception = promise.result(scope);
                return Err(anyhow!(
                    "Render function threw: {}",
                    exception.to_rust_string_lossy(scope)
                ));
            }
            deno_core::v8::PromiseState::Pending => {
                return Err(anyhow!("Render function returned unresolved promise"));
            }
        }
    };

    let raw: RawOutput = serde_json::from_str(&json)
        .map_err(|e| anyhow!("Render engine returned malformed output: {}", e))?;

    Ok(EngineOutput {
        app: raw.app,
        context: raw.context,
    })
}

/// Take the console output captured since the last drain.
pub fn drain_console(runtime: &mut JsRuntime) -> ConsoleOutput {
    std::mem::take(
        runtime
            .op_state()
            .borrow_mut()
            .borrow_mut::<ConsoleOutput>(),
    )
}
