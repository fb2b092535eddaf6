//! # SSR Pipeline
//!
//! Server-side rendering request pipeline with a sandboxed render engine.
//!
//! A request goes through the [`Dispatcher`]: dev middleware, router base
//! stripping, `static/` files and production bundles. Anything still
//! unanswered is rendered by the [`RouteRenderer`], which runs the server
//! bundle through a [`ComponentRenderer`] and wraps the markup in the HTML
//! document with the hydration state. [`HydrationVerifier`] checks from a
//! test harness that a rendered page hydrates in a DOM sandbox.
//!
//! ## Render engine sandbox
//!
//! [`SandboxRenderer`] runs the server bundle in a V8 isolate with:
//!
//! - **No filesystem access**: only modules inside the bundle directory load
//! - **No remote imports**: `http:`, `https:`, `data:` and `blob:` are rejected
//! - **Gated network**: `fetch()` reaches allow-listed origins only
//! - **Bounded**: heap limit and per-render timeout
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ssr_pipeline::{AppTemplate, Dispatcher, EngineSlot, PipelineConfig, RequestParts, SandboxRenderer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(PipelineConfig::new().with_base("/shop/")?);
//!     let engine = SandboxRenderer::spawn(config.sandbox_config()?, &config.server_entry)?;
//!     let dispatcher = Dispatcher::new(config, EngineSlot::ready(Arc::new(engine)), AppTemplate::default());
//!
//!     let response = dispatcher.handle(RequestParts::get("/shop/products?page=2")).await?;
//!     println!("{} {}", response.status(), String::from_utf8_lossy(response.body()));
//!     Ok(())
//! }
//! ```

pub mod config;
mod console;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
mod fetch;
mod loader;
pub mod logging;
pub mod renderer;
pub mod response;
mod runtime;
mod sanitize;
pub mod server;
pub mod static_files;
pub mod template;
pub mod verifier;
pub mod watch;

pub use config::{AssetFilenames, PipelineConfig};
pub use console::{ConsoleLevel, ConsoleSink};
pub use context::{build_context, AppState, ErrorInfo, RedirectInfo, RenderContext, RequestParts};
pub use dispatcher::{AssetServer, Dispatcher, Middleware, RequestUrl};
pub use engine::SandboxRenderer;
pub use error::{ConfigError, FatalError, PipelineError, SetupError, VerifyError};
pub use fetch::FetchConfig;
pub use loader::BundleLoader;
pub use renderer::{ComponentRenderer, EngineSlot, RenderResult, RouteRenderer, EMPTY_MOUNT_POINT};
pub use response::ResponseState;
pub use runtime::SandboxConfig;
pub use static_files::{DevBundleMiddleware, StaticFiles};
pub use template::{AppTemplate, ErrorTemplate};
pub use verifier::{DomSandbox, DomWindow, HydrationVerifier, SandboxOptions, VerifyOptions};
