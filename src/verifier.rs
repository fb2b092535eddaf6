//! Hydration verifier for test harnesses.
//!
//! Loads a rendered page into a DOM sandbox, runs its client scripts and
//! hands back the window once the client application reports it has
//! attached. The sandbox itself is a collaborator behind [`DomSandbox`].

use crate::console::{host_sink, ConsoleSink};
use crate::error::{SetupError, VerifyError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;

/// Global the server writes the hydration state into.
pub const HYDRATION_MARKER: &str = "__SSR_STATE__";

/// Callback the client application calls once mounted.
pub const READY_HOOK: &str = "onSsrReady";

pub const DEFAULT_URL: &str = "http://localhost:3000";

/// External resources the sandbox should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Script,
    Stylesheet,
}

/// How the sandbox should load a page.
#[derive(Clone)]
pub struct SandboxOptions {
    pub fetch_external: Vec<ResourceKind>,
    /// Execute fetched scripts
    pub process_external: bool,
    /// Where page console output goes; `None` silences it
    pub console: Option<ConsoleSink>,
}

impl std::fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxOptions")
            .field("fetch_external", &self.fetch_external)
            .field("process_external", &self.process_external)
            .field("console", &self.console.is_some())
            .finish()
    }
}

/// A DOM environment able to load a page and run its scripts.
#[async_trait]
pub trait DomSandbox: Send + Sync {
    async fn load(&self, url: &Url, options: SandboxOptions) -> anyhow::Result<Box<dyn DomWindow>>;
}

/// A loaded page.
pub trait DomWindow: Send {
    fn has_global(&self, name: &str) -> bool;

    /// Inner HTML of `<body>`
    fn body_html(&self) -> String;

    /// Replace `window.scrollTo` with a no-op.
    fn stub_scroll_to(&mut self);

    /// Install a global function that runs `callback` the first time the
    /// page calls it.
    fn on_ready(&mut self, hook: &str, callback: Box<dyn FnOnce() + Send>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Forward page console output to the host log
    pub virtual_console: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            virtual_console: true,
        }
    }
}

pub struct HydrationVerifier {
    sandbox: Arc<dyn DomSandbox>,
    default_url: String,
}

impl HydrationVerifier {
    pub fn new(sandbox: Arc<dyn DomSandbox>) -> Self {
        Self {
            sandbox,
            default_url: DEFAULT_URL.to_string(),
        }
    }

    /// Build a verifier from a sandbox discovered at runtime.
    pub fn from_provider(sandbox: Option<Arc<dyn DomSandbox>>) -> Result<Self, SetupError> {
        match sandbox {
            Some(sandbox) => Ok(Self::new(sandbox)),
            None => {
                tracing::error!("DOM sandbox is not installed");
                tracing::error!("Provide a DomSandbox implementation to the test harness to verify hydration");
                Err(SetupError::SandboxUnavailable("no DomSandbox was provided"))
            }
        }
    }

    /// Base URL used when no URL is given, and for relative URLs.
    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = url.into();
        self
    }

    fn resolve(&self, url: Option<&str>) -> Result<Url, VerifyError> {
        let raw = url.unwrap_or(&self.default_url);
        let invalid = |source: url::ParseError| VerifyError::InvalidUrl {
            url: raw.to_string(),
            source,
        };
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.default_url)
                .and_then(|base| base.join(raw))
                .map_err(invalid),
            Err(e) => Err(invalid(e)),
        }
    }

    /// Load `url` and wait for the client application to report ready.
    ///
    /// There is no timeout: a page that never calls the ready hook never
    /// resolves.
    pub async fn render_and_get_window(
        &self,
        url: Option<&str>,
        options: VerifyOptions,
    ) -> Result<Box<dyn DomWindow>, VerifyError> {
        let url = self.resolve(url)?;
        tracing::debug!(url = %url, "loading page into DOM sandbox");

        let sandbox_options = SandboxOptions {
            fetch_external: vec![ResourceKind::Script, ResourceKind::Stylesheet],
            process_external: true,
            console: options.virtual_console.then(host_sink),
        };
        let mut window = self
            .sandbox
            .load(&url, sandbox_options)
            .await
            .map_err(VerifyError::Load)?;

        window.stub_scroll_to();

        if !window.has_global(HYDRATION_MARKER) {
            return Err(VerifyError::NotHydrated {
                message: "Could not load the app".to_string(),
                body: window.body_html(),
            });
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        window
            .on_ready(
                READY_HOOK,
                Box::new(move || {
                    let _ = ready_tx.send(());
                }),
            )
            .map_err(VerifyError::Load)?;

        ready_rx.await.map_err(|_| VerifyError::ReadyDropped)?;
        tracing::debug!(url = %url, "client application ready");
        Ok(window)
    }
}
