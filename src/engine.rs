//! [`ComponentRenderer`] backed by the sandboxed JavaScript runtime.
//!
//! `JsRuntime` is `!Send`, so each engine owns a dedicated thread running a
//! current-thread tokio runtime. Render jobs arrive over a channel; one
//! isolate serves every job, with the bundle's modules cached between renders.

use crate::console::trace_console;
use crate::context::{ContextPatch, RenderContext};
use crate::renderer::ComponentRenderer;
use crate::runtime::{create_runtime, drain_console, execute_render, EngineOutput, SandboxConfig};
use crate::sanitize::sanitize_context;
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Render jobs queued per engine before callers wait
const QUEUE_DEPTH: usize = 64;

struct RenderJob {
    context: serde_json::Value,
    reply: oneshot::Sender<Result<EngineOutput>>,
}

/// Render engine running the server bundle in its own thread.
pub struct SandboxRenderer {
    jobs: mpsc::Sender<RenderJob>,
}

impl SandboxRenderer {
    /// Start an engine for `entry`. Blocks until the isolate is up, so a bad
    /// bundle directory is reported here rather than on the first request.
    pub fn spawn(config: SandboxConfig, entry: impl Into<PathBuf>) -> Result<Self> {
        let entry = entry.into();
        if !entry.is_file() {
            return Err(anyhow!("Server bundle entry '{}' not found", entry.display()));
        }

        let (jobs_tx, jobs_rx) = mpsc::channel(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let worker_entry = entry.clone();

        std::thread::Builder::new()
            .name("ssr-engine".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow!("Failed to start engine runtime: {}", e)));
                        return;
                    }
                };
                rt.block_on(run_worker(config, worker_entry, jobs_rx, ready_tx));
            })
            .context("Failed to spawn engine thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Engine thread exited during startup"))??;

        tracing::info!(entry = %entry.display(), "render engine ready");
        Ok(Self { jobs: jobs_tx })
    }
}

async fn run_worker(
    config: SandboxConfig,
    entry: PathBuf,
    mut jobs: mpsc::Receiver<RenderJob>,
    ready: std::sync::mpsc::Sender<Result<()>>,
) {
    let mut runtime = match create_runtime(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Ends when every SandboxRenderer handle has been dropped
    while let Some(job) = jobs.recv().await {
        let result = execute_render(&mut runtime, &entry, job.context, config.timeout_ms).await;
        drain_console(&mut runtime).forward(&trace_console);
        let _ = job.reply.send(result);
    }

    tracing::debug!(entry = %entry.display(), "render engine stopped");
}

#[async_trait]
impl ComponentRenderer for SandboxRenderer {
    async fn render_to_string(&self, context: &mut RenderContext) -> Result<String> {
        let value = sanitize_context(serde_json::to_value(&*context)?)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                context: value,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("Render engine has stopped"))?;

        let output = reply_rx
            .await
            .map_err(|_| anyhow!("Render engine dropped the job"))??;

        let patch: ContextPatch = serde_json::from_value(output.context)
            .context("Render engine returned an invalid context")?;
        context.apply(patch);

        Ok(output.app)
    }
}
