//! Route rendering: engine output wrapped in the HTML document.

use crate::config::PipelineConfig;
use crate::context::{ErrorInfo, RedirectInfo, RenderContext};
use crate::error::PipelineError;
use crate::template::{script_safe_json, url_join, AppTemplate, AppTemplateVars, AssetFiles};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Markup used when the app is left to the client.
pub const EMPTY_MOUNT_POINT: &str = r#"<div id="__ssr"></div>"#;

/// Turns a render context into application markup.
///
/// Implementations may set the context's error, `server_rendered`, data and
/// redirect fields as a side effect.
#[async_trait]
pub trait ComponentRenderer: Send + Sync {
    async fn render_to_string(&self, context: &mut RenderContext) -> anyhow::Result<String>;
}

/// The current render engine, absent until a build is available.
#[derive(Clone, Default)]
pub struct EngineSlot(Arc<RwLock<Option<Arc<dyn ComponentRenderer>>>>);

impl EngineSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ready(engine: Arc<dyn ComponentRenderer>) -> Self {
        let slot = Self::default();
        slot.set(engine);
        slot
    }

    /// Install or replace the engine.
    pub fn set(&self, engine: Arc<dyn ComponentRenderer>) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(engine);
    }

    pub fn get(&self) -> Option<Arc<dyn ComponentRenderer>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_ready(&self) -> bool {
        self.get().is_some()
    }
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Output of one route render, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub html: String,
    pub error: Option<ErrorInfo>,
    pub redirected: Option<RedirectInfo>,
}

/// Renders a URL to a full HTML document. Performs no response I/O.
pub struct RouteRenderer {
    config: Arc<PipelineConfig>,
    engine: EngineSlot,
    template: AppTemplate,
    files: AssetFiles,
}

impl RouteRenderer {
    pub fn new(config: Arc<PipelineConfig>, engine: EngineSlot, template: AppTemplate) -> Self {
        let asset = |filename: &str| url_join(&[&config.base, &config.assets_dir, filename]);
        let files = AssetFiles {
            app: asset(&config.filenames.app),
            vendor: asset(&config.filenames.vendor),
            css: asset(&config.filenames.css),
        };
        Self {
            config,
            engine,
            template,
            files,
        }
    }

    pub fn engine(&self) -> &EngineSlot {
        &self.engine
    }

    pub fn files(&self) -> &AssetFiles {
        &self.files
    }

    /// Render `url` with `context`. The context is consumed: it serves exactly one render.
    pub async fn render_route(
        &self,
        url: &str,
        mut context: RenderContext,
    ) -> anyhow::Result<RenderResult> {
        tracing::debug!(url, "Rendering url");

        context.url = url.to_string();
        context.is_server = true;

        let engine = self.engine.get().ok_or(PipelineError::EngineNotReady)?;
        let mut app = engine.render_to_string(&mut context).await?;
        if !context.state.server_rendered {
            app = EMPTY_MOUNT_POINT.to_string();
        }

        let state = script_safe_json(&context.state)?;
        let html = self
            .template
            .render(&AppTemplateVars {
                dev: self.config.dev,
                base_url: &self.config.base,
                app: &app,
                context: serde_json::to_value(&context)?,
                state: &state,
                files: &self.files,
            })
            .map_err(PipelineError::from)?;

        Ok(RenderResult {
            html,
            error: context.state.error,
            redirected: context.redirected,
        })
    }
}
