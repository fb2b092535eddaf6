//! Dev-mode engine reload.
//!
//! Watches the server bundle directory and swaps a fresh [`SandboxRenderer`]
//! into the [`EngineSlot`] whenever the bundle is rebuilt. Until the first
//! build lands the slot stays empty and the dispatcher retries once.

use crate::engine::SandboxRenderer;
use crate::renderer::EngineSlot;
use crate::runtime::SandboxConfig;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Quiet period after the last change before the engine is rebuilt. A bundler
/// writes several chunks per build.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Start an engine for `entry` and install it. A failed build keeps the
/// previous engine in place.
pub fn reload_engine(entry: &Path, config: &SandboxConfig, slot: &EngineSlot) -> bool {
    if !entry.is_file() {
        tracing::debug!(entry = %entry.display(), "server bundle not built yet");
        return false;
    }
    match SandboxRenderer::spawn(config.clone(), entry) {
        Ok(engine) => {
            slot.set(Arc::new(engine));
            tracing::info!(entry = %entry.display(), "render engine reloaded");
            true
        }
        Err(e) => {
            tracing::error!(entry = %entry.display(), error = format!("{e:#}"), "render engine reload failed");
            false
        }
    }
}

/// Watch the directory holding `entry` and reload the engine on changes.
///
/// The returned watcher must be kept alive for reloads to continue.
pub fn watch_server_bundle(
    entry: impl Into<PathBuf>,
    config: SandboxConfig,
    slot: EngineSlot,
) -> notify::Result<RecommendedWatcher> {
    let entry: PathBuf = entry.into();
    let dir = config.bundle_dir.clone();
    std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;

    reload_engine(&entry, &config, &slot);

    let (changes_tx, changes_rx) = mpsc::channel::<()>();
    std::thread::Builder::new()
        .name("ssr-reload".into())
        .spawn(move || {
            // Exits once the watcher (and with it the sender) is dropped
            while changes_rx.recv().is_ok() {
                if !coalesce(&changes_rx, RELOAD_DEBOUNCE) {
                    break;
                }
                reload_engine(&entry, &config, &slot);
            }
        })
        .map_err(notify::Error::io)?;

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if event.paths.iter().any(|p| is_module(p)) {
                    let _ = changes_tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "bundle watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::Recursive)?;
    tracing::info!(dir = %dir.display(), "watching server bundle");
    Ok(watcher)
}

/// Swallow further change signals until `quiet` passes without one.
/// Returns `false` if the sender went away.
fn coalesce(changes: &Receiver<()>, quiet: Duration) -> bool {
    loop {
        match changes.recv_timeout(quiet) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Timeout) => return true,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

fn is_module(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js") | Some("mjs")
    )
}
