//! File serving for `static/` and the built client bundles.

use crate::context::RequestParts;
use crate::dispatcher::{strip_base, AssetServer, Middleware, RequestUrl};
use anyhow::Context as _;
use async_trait::async_trait;
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::response::ResponseState;

/// Cache lifetime for fingerprinted production bundles
pub const BUNDLE_MAX_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Serves files under a root directory. Misses leave the response untouched.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
    max_age: Duration,
    no_cache: bool,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
            max_age: Duration::ZERO,
            no_cache: false,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Tell clients to revalidate every time (dev bundles change under them).
    pub fn with_no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// Map a URL path to a file path, rejecting anything that could leave the root.
    ///
    /// Segments are percent-decoded one at a time, so an encoded `..` or
    /// separator is caught after decoding.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let path = url_path.split(['?', '#']).next().unwrap_or_default();
        let mut pb = self.base_dir.clone();
        for raw in path.split('/') {
            let segment = percent_decode_str(raw).decode_utf8().ok()?;
            match segment.as_ref() {
                "" | "." => {}
                ".." => return None,
                s if s.contains(['/', '\\', '\0']) => return None,
                s => pb.push(s),
            }
        }
        Some(pb)
    }

    fn cache_control(&self) -> HeaderValue {
        if self.no_cache {
            return HeaderValue::from_static("no-cache");
        }
        HeaderValue::from_str(&format!("public, max-age={}", self.max_age.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=0"))
    }
}

#[async_trait]
impl AssetServer for StaticFiles {
    async fn serve(
        &self,
        request: &RequestParts,
        path: &str,
        response: &mut ResponseState,
    ) -> anyhow::Result<()> {
        if request.method != Method::GET && request.method != Method::HEAD {
            return Ok(());
        }
        let Some(file) = self.map_path(path) else {
            return Ok(());
        };

        // Directories are misses so "/" still reaches the renderer
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(()),
        }

        let bytes = tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read '{}'", file.display()))?;
        let mime = mime_guess::from_path(&file).first_or_octet_stream();

        tracing::debug!(path, file = %file.display(), "serving file");
        response.set_header(CONTENT_TYPE, HeaderValue::from_str(mime.as_ref())?);
        response.set_header(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        response.set_header(CACHE_CONTROL, self.cache_control());
        if request.method == Method::HEAD {
            response.end(Vec::new());
        } else {
            response.end(bytes);
        }
        Ok(())
    }
}

/// Dev middleware serving bundle URLs straight from the client build directory.
///
/// Dev middleware runs before the router base is stripped, so it strips the
/// base itself before matching the bundle pattern.
pub struct DevBundleMiddleware {
    pattern: Regex,
    base: String,
    files: Arc<dyn AssetServer>,
}

impl DevBundleMiddleware {
    pub fn new(pattern: Regex, base: impl Into<String>, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            pattern,
            base: base.into(),
            files: Arc::new(StaticFiles::new(dist_dir).with_no_cache()),
        }
    }
}

#[async_trait]
impl Middleware for DevBundleMiddleware {
    async fn handle(
        &self,
        request: &RequestParts,
        url: &RequestUrl,
        response: &mut ResponseState,
    ) -> anyhow::Result<()> {
        let url = strip_base(url.original(), &self.base)
            .unwrap_or_else(|| url.original().to_string());
        if !self.pattern.is_match(&url) {
            return Ok(());
        }
        let path = self.pattern.replace(&url, "/");
        self.files.serve(request, &path, response).await
    }
}
