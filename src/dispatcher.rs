//! Request dispatcher: the top of the render pipeline.
//!
//! A request runs through an ordered list of stages (dev middleware, base
//! stripping, static files, production bundles). Any stage may end the
//! response, which skips the rest. Whatever is still open afterwards is
//! rendered by the [`RouteRenderer`]. Failures anywhere below [`Dispatcher::handle`]
//! become a 500 page; only [`FatalError`] escapes.

use crate::config::PipelineConfig;
use crate::context::{build_context, RequestParts};
use crate::error::FatalError;
use crate::renderer::{EngineSlot, RenderResult, RouteRenderer};
use crate::response::ResponseState;
use crate::static_files::{StaticFiles, BUNDLE_MAX_AGE};
use crate::template::{AppTemplate, ErrorTemplate};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use futures::FutureExt;
use http::header::{HeaderValue, LOCATION};
use http::StatusCode;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Dev-mode request hook, e.g. a live-rebuild server. May end the response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        request: &RequestParts,
        url: &RequestUrl,
        response: &mut ResponseState,
    ) -> anyhow::Result<()>;
}

/// Serves files for a URL path. Ends the response on a hit, no-op on a miss.
#[async_trait]
pub trait AssetServer: Send + Sync {
    async fn serve(
        &self,
        request: &RequestParts,
        path: &str,
        response: &mut ResponseState,
    ) -> anyhow::Result<()>;
}

/// The request URL as received, and the form routing works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    original: String,
    normalized: String,
}

impl RequestUrl {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            normalized: url.clone(),
            original: url,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Strip the router base from the normalized URL.
    pub fn strip_base(self, base: &str) -> Self {
        match strip_base(&self.normalized, base) {
            Some(normalized) => Self { normalized, ..self },
            None => self,
        }
    }
}

/// Remove the first occurrence of `base` when it prefixes `url`, keeping the
/// result rooted at `/`. Returns `None` when there is nothing to strip.
pub fn strip_base(url: &str, base: &str) -> Option<String> {
    if base == "/" || !url.starts_with(base) {
        return None;
    }
    let rest = &url[base.len()..];
    Some(if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    DevMiddleware(usize),
    StripBase,
    ServeStatic,
    ServeBundle,
}

pub struct Dispatcher {
    config: Arc<PipelineConfig>,
    stages: Vec<Stage>,
    dev_middleware: Vec<Arc<dyn Middleware>>,
    static_files: Arc<dyn AssetServer>,
    bundle_files: Arc<dyn AssetServer>,
    route_renderer: RouteRenderer,
    error_template: ErrorTemplate,
}

impl Dispatcher {
    /// Build a dispatcher serving files from the configured directories.
    pub fn new(config: Arc<PipelineConfig>, engine: EngineSlot, template: AppTemplate) -> Self {
        let static_files: Arc<dyn AssetServer> = Arc::new(StaticFiles::new(&config.static_dir));
        let bundle_files: Arc<dyn AssetServer> =
            Arc::new(StaticFiles::new(&config.dist_dir).with_max_age(BUNDLE_MAX_AGE));
        let mut dispatcher = Self {
            route_renderer: RouteRenderer::new(config.clone(), engine, template),
            error_template: ErrorTemplate::new(config.dev),
            config,
            stages: Vec::new(),
            dev_middleware: Vec::new(),
            static_files,
            bundle_files,
        };
        dispatcher.rebuild_stages();
        dispatcher
    }

    /// Append a dev middleware. Middleware run in the order they are added,
    /// and only in development mode.
    pub fn with_dev_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.dev_middleware.push(middleware);
        self.rebuild_stages();
        self
    }

    pub fn with_static_files(mut self, files: Arc<dyn AssetServer>) -> Self {
        self.static_files = files;
        self
    }

    pub fn with_bundle_files(mut self, files: Arc<dyn AssetServer>) -> Self {
        self.bundle_files = files;
        self
    }

    pub fn with_error_template(mut self, template: ErrorTemplate) -> Self {
        self.error_template = template;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &EngineSlot {
        self.route_renderer.engine()
    }

    fn rebuild_stages(&mut self) {
        let mut stages = Vec::with_capacity(self.dev_middleware.len() + 3);
        if self.config.dev {
            stages.extend((0..self.dev_middleware.len()).map(Stage::DevMiddleware));
        }
        stages.push(Stage::StripBase);
        stages.push(Stage::ServeStatic);
        if !self.config.dev {
            stages.push(Stage::ServeBundle);
        }
        self.stages = stages;
    }

    /// Outside development mode there is nothing to serve without a build.
    pub fn check_ready(&self) -> Result<(), FatalError> {
        if self.config.dev || self.engine().is_ready() {
            return Ok(());
        }
        tracing::error!(
            entry = %self.config.server_entry.display(),
            "No build files found, build the app before starting in production mode"
        );
        Err(FatalError::MissingBuild(self.config.server_entry.clone()))
    }

    /// Handle one request.
    ///
    /// In development mode a request that arrives before the engine is built
    /// is re-dispatched once after the configured delay.
    pub async fn handle(&self, request: RequestParts) -> Result<ResponseState, FatalError> {
        if !self.engine().is_ready() {
            self.check_ready()?;
            tracing::debug!(
                url = %request.url,
                delay_ms = self.config.engine_retry_delay.as_millis() as u64,
                "render engine not ready, retrying"
            );
            tokio::time::sleep(self.config.engine_retry_delay).await;
        }
        Ok(self.dispatch(&request).await)
    }

    async fn dispatch(&self, request: &RequestParts) -> ResponseState {
        let mut response = ResponseState::new();
        let outcome = AssertUnwindSafe(self.run(request, &mut response))
            .catch_unwind()
            .await;

        let err = match outcome {
            Ok(Ok(())) => return response,
            Ok(Err(err)) => err,
            Err(panic) => anyhow!("render pipeline panicked: {}", panic_message(&*panic)),
        };

        tracing::error!(url = %request.url, error = format!("{err:#}"), "request failed");
        if response.is_ended() {
            return response;
        }

        let mut response = ResponseState::new();
        response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.end_html(self.error_template.render(&err));
        response
    }

    async fn run(&self, request: &RequestParts, response: &mut ResponseState) -> anyhow::Result<()> {
        let mut url = RequestUrl::new(request.url.clone());

        for stage in &self.stages {
            if response.is_ended() {
                return Ok(());
            }
            match *stage {
                Stage::DevMiddleware(i) => {
                    self.dev_middleware[i].handle(request, &url, response).await?;
                }
                Stage::StripBase => url = url.strip_base(&self.config.base),
                Stage::ServeStatic => {
                    self.static_files
                        .serve(request, url.normalized(), response)
                        .await?;
                }
                Stage::ServeBundle => {
                    let pattern = &self.config.bundle_pattern;
                    if pattern.is_match(url.normalized()) {
                        let path = pattern.replace(url.normalized(), "/");
                        self.bundle_files.serve(request, &path, response).await?;
                    }
                }
            }
        }
        if response.is_ended() {
            return Ok(());
        }

        if self.is_stale_hot_update(url.normalized()) {
            tracing::debug!(url = url.normalized(), "unknown hot-update poll");
            response.set_status(StatusCode::NOT_FOUND);
            response.end_html(String::new());
            return Ok(());
        }

        let context = build_context(request)?;
        let result = self
            .route_renderer
            .render_route(url.normalized(), context)
            .await?;
        emit(result, response)
    }

    /// A hot-update manifest poll that no dev middleware answered.
    fn is_stale_hot_update(&self, url: &str) -> bool {
        self.config.dev
            && self.config.bundle_pattern.is_match(url)
            && url.contains(".hot-update.json")
    }
}

/// Write a render result to the response.
fn emit(result: RenderResult, response: &mut ResponseState) -> anyhow::Result<()> {
    if let Some(redirect) = result.redirected {
        let status = redirect
            .status_code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .filter(StatusCode::is_redirection)
            .unwrap_or(StatusCode::FOUND);
        let location = HeaderValue::from_str(&redirect.path)
            .with_context(|| format!("invalid redirect location '{}'", redirect.path))?;
        response.set_status(status);
        response.set_header(LOCATION, location);
        response.end_html(String::new());
        return Ok(());
    }

    if let Some(error) = &result.error {
        let status = error
            .status_code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        response.set_status(status);
    }
    response.end_html(result.html);
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ErrorInfo, RedirectInfo, RenderContext};
    use crate::renderer::tests::FakeEngine;
    use crate::renderer::ComponentRenderer;
    use crate::response::HTML_CONTENT_TYPE;
    use crate::static_files::DevBundleMiddleware;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _static_dir: TempDir,
        _dist_dir: TempDir,
        config: PipelineConfig,
    }

    fn fixture(dev: bool) -> Fixture {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("favicon.ico"), [0u8, 1, 2]).unwrap();
        let dist_dir = tempfile::tempdir().unwrap();
        std::fs::write(dist_dir.path().join("app.js"), "window.app = 1").unwrap();

        let config = PipelineConfig::new()
            .with_dev(dev)
            .with_static_dir(static_dir.path())
            .with_dist_dir(dist_dir.path())
            .with_engine_retry_delay(Duration::from_millis(50));
        Fixture {
            _static_dir: static_dir,
            _dist_dir: dist_dir,
            config,
        }
    }

    fn dispatcher(config: PipelineConfig, engine: Arc<FakeEngine>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(config),
            EngineSlot::ready(engine),
            AppTemplate::new("<html>{{ app }}</html>"),
        )
    }

    fn body(res: &ResponseState) -> String {
        String::from_utf8(res.body().to_vec()).unwrap()
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        end: bool,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn handle(
            &self,
            _request: &RequestParts,
            url: &RequestUrl,
            response: &mut ResponseState,
        ) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{} {}", self.name, url.original()));
            if self.end {
                response.end("served by middleware");
            }
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Middleware for Panicking {
        async fn handle(
            &self,
            _request: &RequestParts,
            _url: &RequestUrl,
            _response: &mut ResponseState,
        ) -> anyhow::Result<()> {
            panic!("middleware bug");
        }
    }

    struct BrokenDisk;

    #[async_trait]
    impl AssetServer for BrokenDisk {
        async fn serve(
            &self,
            _request: &RequestParts,
            _path: &str,
            _response: &mut ResponseState,
        ) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[test]
    fn test_strip_base() {
        assert_eq!(strip_base("/foo", "/foo").as_deref(), Some("/"));
        assert_eq!(strip_base("/foo/bar", "/foo/").as_deref(), Some("/bar"));
        assert_eq!(strip_base("/foo/bar", "/foo").as_deref(), Some("/bar"));
        assert_eq!(strip_base("/foo?x=1", "/foo").as_deref(), Some("/?x=1"));
        assert_eq!(strip_base("/bar/foo", "/foo"), None);
        assert_eq!(strip_base("/anything", "/"), None);
    }

    #[test]
    fn test_request_url_strips_once() {
        let url = RequestUrl::new("/foo/foo/page").strip_base("/foo/");
        assert_eq!(url.normalized(), "/foo/page");
        assert_eq!(url.original(), "/foo/foo/page");
    }

    #[test]
    fn test_stage_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mw = |name| {
            Arc::new(Recording {
                name,
                log: log.clone(),
                end: false,
            })
        };

        let dev = dispatcher(fixture(true).config, Arc::new(FakeEngine::new("")))
            .with_dev_middleware(mw("a"))
            .with_dev_middleware(mw("b"));
        assert_eq!(
            dev.stages,
            vec![
                Stage::DevMiddleware(0),
                Stage::DevMiddleware(1),
                Stage::StripBase,
                Stage::ServeStatic
            ]
        );

        let prod = dispatcher(fixture(false).config, Arc::new(FakeEngine::new("")))
            .with_dev_middleware(mw("a"));
        assert_eq!(
            prod.stages,
            vec![Stage::StripBase, Stage::ServeStatic, Stage::ServeBundle]
        );
    }

    #[tokio::test]
    async fn test_renders_route() {
        let fx = fixture(false);
        let engine = Arc::new(FakeEngine::new("<main>home</main>"));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(body(&res), "<html><main>home</main><!-- / --></html>");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_base_prefix_is_stripped() {
        let fx = fixture(false);
        let config = fx.config.clone().with_base("/foo").unwrap();
        let d = dispatcher(config, Arc::new(FakeEngine::new("")));

        let res = d.handle(RequestParts::get("/foo")).await.unwrap();
        assert_eq!(body(&res), "<html><!-- / --></html>");

        // Not a prefix: left alone
        let res = d.handle(RequestParts::get("/bar/foo")).await.unwrap();
        assert_eq!(body(&res), "<html><!-- /bar/foo --></html>");
    }

    #[tokio::test]
    async fn test_content_length_is_byte_length() {
        let fx = fixture(false);
        let d = dispatcher(fx.config.clone(), Arc::new(FakeEngine::new("<p>naïve café · 東京 🍣</p>")));

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        let html = body(&res);
        assert!(html.len() > html.chars().count());
        assert_eq!(res.headers()[CONTENT_LENGTH], html.len().to_string().as_str());
    }

    #[tokio::test]
    async fn test_static_hit_skips_rendering() {
        let fx = fixture(false);
        let engine = Arc::new(FakeEngine::new(""));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d.handle(RequestParts::get("/favicon.ico")).await.unwrap();
        assert_eq!(res.body().as_ref(), &[0u8, 1, 2]);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_production_bundle_is_served_from_dist() {
        let fx = fixture(false);
        let engine = Arc::new(FakeEngine::new(""));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d.handle(RequestParts::get("/_ssr/app.js")).await.unwrap();
        assert_eq!(body(&res), "window.app = 1");
        assert_eq!(res.headers()[http::header::CACHE_CONTROL], "public, max-age=31536000");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bundle_under_base() {
        let fx = fixture(false);
        let config = fx.config.clone().with_base("/shop/").unwrap();
        let d = dispatcher(config, Arc::new(FakeEngine::new("")));

        let res = d.handle(RequestParts::get("/shop/_ssr/app.js")).await.unwrap();
        assert_eq!(body(&res), "window.app = 1");
    }

    #[tokio::test]
    async fn test_bundles_not_served_from_disk_in_dev() {
        let fx = fixture(true);
        let engine = Arc::new(FakeEngine::new("<main/>"));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d.handle(RequestParts::get("/_ssr/app.js")).await.unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert!(body(&res).contains("<main/>"));
    }

    #[tokio::test]
    async fn test_dev_bundle_under_base() {
        let fx = fixture(true);
        let config = fx.config.clone().with_base("/shop/").unwrap();
        let engine = Arc::new(FakeEngine::new("<main/>"));
        let bundles = DevBundleMiddleware::new(
            config.bundle_pattern.clone(),
            config.base.clone(),
            config.dist_dir.clone(),
        );
        let d = dispatcher(config, engine.clone()).with_dev_middleware(Arc::new(bundles));

        let res = d.handle(RequestParts::get("/shop/_ssr/app.js")).await.unwrap();
        assert_eq!(body(&res), "window.app = 1");
        assert_eq!(res.headers()[http::header::CACHE_CONTROL], "no-cache");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dev_middleware_runs_in_order_and_can_end() {
        let fx = fixture(true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::new(FakeEngine::new(""));
        let d = dispatcher(fx.config.clone(), engine.clone())
            .with_dev_middleware(Arc::new(Recording {
                name: "a",
                log: log.clone(),
                end: false,
            }))
            .with_dev_middleware(Arc::new(Recording {
                name: "b",
                log: log.clone(),
                end: true,
            }))
            .with_dev_middleware(Arc::new(Recording {
                name: "c",
                log: log.clone(),
                end: false,
            }));

        let res = d.handle(RequestParts::get("/_ssr/app.js")).await.unwrap();
        assert_eq!(body(&res), "served by middleware");
        assert_eq!(*log.lock().unwrap(), vec!["a /_ssr/app.js", "b /_ssr/app.js"]);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_hot_update_is_404() {
        let fx = fixture(true);
        let engine = Arc::new(FakeEngine::new(""));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d
            .handle(RequestParts::get("/_ssr/0a1b2c.hot-update.json"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(res.is_ended());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hot_update_answered_by_middleware_is_kept() {
        let fx = fixture(true);
        let d = dispatcher(fx.config.clone(), Arc::new(FakeEngine::new(""))).with_dev_middleware(
            Arc::new(Recording {
                name: "hot",
                log: Arc::new(Mutex::new(Vec::new())),
                end: true,
            }),
        );

        let res = d
            .handle(RequestParts::get("/_ssr/0a1b2c.hot-update.json"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res), "served by middleware");
    }

    #[tokio::test]
    async fn test_hot_update_outside_bundles_is_rendered() {
        let fx = fixture(true);
        let engine = Arc::new(FakeEngine::new(""));
        let d = dispatcher(fx.config.clone(), engine.clone());

        let res = d.handle(RequestParts::get("/x.hot-update.json")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_app_error_sets_status() {
        let fx = fixture(false);
        let engine = FakeEngine::new("<h1>Not found</h1>").with_edit(|ctx: &mut RenderContext| {
            ctx.state.error = Some(ErrorInfo {
                status_code: Some(404),
                message: "not found".to_string(),
            });
        });
        let d = dispatcher(fx.config.clone(), Arc::new(engine));

        let res = d.handle(RequestParts::get("/missing")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body(&res).contains("<h1>Not found</h1>"));
    }

    #[tokio::test]
    async fn test_app_error_without_code_is_500() {
        let fx = fixture(false);
        let engine = FakeEngine::new("<h1>Oops</h1>").with_edit(|ctx: &mut RenderContext| {
            ctx.state.error = Some(ErrorInfo {
                status_code: None,
                message: "oops".to_string(),
            });
        });
        let d = dispatcher(fx.config.clone(), Arc::new(engine));

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&res).contains("<h1>Oops</h1>"));
    }

    #[tokio::test]
    async fn test_redirect() {
        let fx = fixture(false);
        let engine = FakeEngine::new("").with_edit(|ctx: &mut RenderContext| {
            ctx.redirected = Some(RedirectInfo {
                path: "/login".to_string(),
                status_code: None,
            });
        });
        let d = dispatcher(fx.config.clone(), Arc::new(engine));

        let res = d.handle(RequestParts::get("/account")).await.unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[LOCATION], "/login");
        assert_eq!(res.headers()[CONTENT_LENGTH], "0");
    }

    #[tokio::test]
    async fn test_stage_failure_renders_error_page() {
        let fx = fixture(false);
        let d = dispatcher(fx.config.clone(), Arc::new(FakeEngine::new("")))
            .with_static_files(Arc::new(BrokenDisk));

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        let html = body(&res);
        assert_eq!(html, ErrorTemplate::new(false).render(&anyhow!("disk on fire")));
        assert_eq!(res.headers()[CONTENT_LENGTH], html.len().to_string().as_str());
    }

    #[tokio::test]
    async fn test_panicking_stage_is_contained() {
        let fx = fixture(true);
        let d = dispatcher(fx.config.clone(), Arc::new(FakeEngine::new("")))
            .with_dev_middleware(Arc::new(Panicking));

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&res).contains("middleware bug"));

        // The dispatcher is still usable afterwards
        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_target_is_500() {
        let fx = fixture(false);
        let d = dispatcher(fx.config.clone(), Arc::new(FakeEngine::new("")));

        let res = d.handle(RequestParts::get("*")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_missing_build_in_production_is_fatal() {
        let fx = fixture(false);
        let d = Dispatcher::new(Arc::new(fx.config.clone()), EngineSlot::empty(), AppTemplate::default());

        assert!(matches!(d.check_ready(), Err(FatalError::MissingBuild(_))));
        let result = d.handle(RequestParts::get("/")).await;
        assert!(matches!(result, Err(FatalError::MissingBuild(_))));
    }

    #[tokio::test]
    async fn test_dev_retries_once_until_engine_ready() {
        let fx = fixture(true);
        let slot = EngineSlot::empty();
        let d = Dispatcher::new(
            Arc::new(fx.config.clone()),
            slot.clone(),
            AppTemplate::new("<html>{{ app }}</html>"),
        );
        assert!(d.check_ready().is_ok());

        let engine = Arc::new(FakeEngine::new("<main>warm</main>"));
        let late = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            slot.set(late as Arc<dyn ComponentRenderer>);
        });

        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains("<main>warm</main>"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dev_engine_still_missing_after_retry_is_500() {
        let fx = fixture(true);
        let d = Dispatcher::new(Arc::new(fx.config.clone()), EngineSlot::empty(), AppTemplate::default());

        let started = std::time::Instant::now();
        let res = d.handle(RequestParts::get("/")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&res).contains("render engine is not ready"));
    }
}
