//! Pipeline configuration.
//!
//! Built once at startup, either from defaults with the `with_*` builders or
//! from a TOML file, and shared read-only behind an `Arc` afterwards.

use crate::error::ConfigError;
use crate::fetch::FetchConfig;
use crate::runtime::SandboxConfig;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filenames of the client bundles referenced by the document template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssetFilenames {
    pub app: String,
    pub vendor: String,
    pub css: String,
}

impl Default for AssetFilenames {
    fn default() -> Self {
        Self {
            app: "app.js".to_string(),
            vendor: "vendor.js".to_string(),
            css: "style.css".to_string(),
        }
    }
}

/// Validated, immutable configuration for the render pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Development mode: dev middleware runs, bundles are not served from disk
    pub dev: bool,
    /// Router base prefix, `/` when the app is mounted at the root
    pub base: String,
    /// Public directory the client bundles are served under
    pub assets_dir: String,
    /// Matches request URLs that target the client bundles
    pub bundle_pattern: Regex,
    pub filenames: AssetFilenames,
    /// Root for `static/` files
    pub static_dir: PathBuf,
    /// Root for built client bundles
    pub dist_dir: PathBuf,
    /// Server bundle entry module, loaded by the render engine
    pub server_entry: PathBuf,
    /// Optional document template overriding the built-in one
    pub template_path: Option<PathBuf>,
    /// Delay before the single re-dispatch while the engine warms up in dev
    pub engine_retry_delay: Duration,
    /// Maximum wall time for a single render (None = unlimited)
    pub render_timeout: Option<Duration>,
    /// Engine heap limit in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Origins server-side `fetch()` may reach
    pub allowed_origins: Vec<String>,
    /// Origin relative `fetch()` URLs resolve against
    pub app_origin: Option<url::Url>,
}

impl PipelineConfig {
    /// Create a configuration with defaults rooted at the current directory.
    pub fn new() -> Self {
        let assets_dir = "/_ssr/".to_string();
        Self {
            dev: false,
            base: "/".to_string(),
            bundle_pattern: bundle_regex(&assets_dir),
            assets_dir,
            filenames: AssetFilenames::default(),
            static_dir: PathBuf::from("static"),
            dist_dir: PathBuf::from(".ssr/dist"),
            server_entry: PathBuf::from(".ssr/server/entry-server.js"),
            template_path: None,
            engine_retry_delay: Duration::from_secs(1),
            render_timeout: Some(Duration::from_secs(30)),
            max_heap_size: Some(64 * 1024 * 1024),
            allowed_origins: Vec::new(),
            app_origin: None,
        }
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Set the router base. Fails unless the base starts with `/`.
    pub fn with_base(mut self, base: impl Into<String>) -> Result<Self, ConfigError> {
        let base = base.into();
        if !base.starts_with('/') {
            return Err(ConfigError::InvalidBase(base));
        }
        self.base = base;
        Ok(self)
    }

    /// Set the public assets directory and derive the default bundle pattern from it.
    pub fn with_assets_dir(mut self, dir: impl Into<String>) -> Result<Self, ConfigError> {
        let dir = dir.into();
        if !dir.starts_with('/') {
            return Err(ConfigError::InvalidAssetsDir(dir));
        }
        self.bundle_pattern = bundle_regex(&dir);
        self.assets_dir = dir;
        Ok(self)
    }

    pub fn with_bundle_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.bundle_pattern = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(self)
    }

    pub fn with_filenames(mut self, filenames: AssetFilenames) -> Self {
        self.filenames = filenames;
        self
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    pub fn with_dist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dist_dir = dir.into();
        self
    }

    pub fn with_server_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.server_entry = entry.into();
        self
    }

    pub fn with_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    pub fn with_engine_retry_delay(mut self, delay: Duration) -> Self {
        self.engine_retry_delay = delay;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Set the origin relative `fetch()` URLs resolve against.
    pub fn with_app_origin(mut self, origin: &str) -> Result<Self, ConfigError> {
        let url = url::Url::parse(origin).map_err(|source| ConfigError::InvalidOrigin {
            origin: origin.to_string(),
            source,
        })?;
        self.app_origin = Some(url);
        Ok(self)
    }

    /// Load a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.into_config()
    }

    /// Sandbox settings for the render engine.
    pub fn sandbox_config(&self) -> Result<SandboxConfig, ConfigError> {
        let bundle_dir = self
            .server_entry
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let fetch = FetchConfig::new(self.allowed_origins.clone(), self.app_origin.clone())
            .map_err(ConfigError::FetchClient)?;

        Ok(SandboxConfig {
            bundle_dir,
            max_heap_size: self.max_heap_size,
            timeout_ms: self.render_timeout.map(|t| t.as_millis() as u64),
            fetch,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Default bundle pattern: the assets directory anchored at the start of the URL.
fn bundle_regex(assets_dir: &str) -> Regex {
    // An escaped literal always compiles
    Regex::new(&format!("^{}", regex::escape(assets_dir))).expect("escaped literal is a valid regex")
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub dev: Option<bool>,
    pub base: Option<String>,
    pub assets_dir: Option<String>,
    pub bundle_pattern: Option<String>,
    pub filenames: Option<AssetFilenames>,
    pub static_dir: Option<PathBuf>,
    pub dist_dir: Option<PathBuf>,
    pub server_entry: Option<PathBuf>,
    pub template: Option<PathBuf>,
    pub engine_retry_ms: Option<u64>,
    pub render_timeout_ms: Option<u64>,
    pub max_heap_mb: Option<usize>,
    pub allowed_origins: Option<Vec<String>>,
    pub app_origin: Option<String>,
}

impl ConfigFile {
    pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        let mut config = PipelineConfig::new();

        if let Some(dev) = self.dev {
            config = config.with_dev(dev);
        }
        if let Some(base) = self.base {
            config = config.with_base(base)?;
        }
        if let Some(dir) = self.assets_dir {
            config = config.with_assets_dir(dir)?;
        }
        if let Some(pattern) = self.bundle_pattern {
            config = config.with_bundle_pattern(&pattern)?;
        }
        if let Some(filenames) = self.filenames {
            config = config.with_filenames(filenames);
        }
        if let Some(dir) = self.static_dir {
            config = config.with_static_dir(dir);
        }
        if let Some(dir) = self.dist_dir {
            config = config.with_dist_dir(dir);
        }
        if let Some(entry) = self.server_entry {
            config = config.with_server_entry(entry);
        }
        if let Some(template) = self.template {
            config = config.with_template(template);
        }
        if let Some(ms) = self.engine_retry_ms {
            config = config.with_engine_retry_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.render_timeout_ms {
            // 0 disables the timeout
            config = config.with_render_timeout((ms > 0).then(|| Duration::from_millis(ms)));
        }
        if let Some(mb) = self.max_heap_mb {
            config.max_heap_size = (mb > 0).then(|| mb * 1024 * 1024);
        }
        if let Some(origins) = self.allowed_origins {
            config = config.with_allowed_origins(origins);
        }
        if let Some(origin) = self.app_origin {
            config = config.with_app_origin(&origin)?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(!config.dev);
        assert_eq!(config.base, "/");
        assert_eq!(config.assets_dir, "/_ssr/");
        assert_eq!(config.engine_retry_delay, Duration::from_secs(1));
        assert!(config.bundle_pattern.is_match("/_ssr/app.js"));
        assert!(!config.bundle_pattern.is_match("/about/_ssr/app.js"));
    }

    #[test]
    fn test_base_must_be_rooted() {
        assert!(PipelineConfig::new().with_base("/foo/").is_ok());
        let err = PipelineConfig::new().with_base("foo").unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_assets_dir_updates_bundle_pattern() {
        let config = PipelineConfig::new().with_assets_dir("/static-build/").unwrap();
        assert!(config.bundle_pattern.is_match("/static-build/app.js"));
        assert!(!config.bundle_pattern.is_match("/_ssr/app.js"));
    }

    #[test]
    fn test_invalid_bundle_pattern() {
        let err = PipelineConfig::new().with_bundle_pattern("([").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_config_file_overrides() {
        let file: ConfigFile = toml::from_str(
            r#"
            dev = true
            base = "/foo/"
            render_timeout_ms = 0
            allowed_origins = ["https://api.example.com"]

            [filenames]
            app = "app.123.js"
            "#,
        )
        .unwrap();
        let config = file.into_config().unwrap();

        assert!(config.dev);
        assert_eq!(config.base, "/foo/");
        assert_eq!(config.render_timeout, None);
        assert_eq!(config.filenames.app, "app.123.js");
        assert_eq!(config.filenames.vendor, "vendor.js");
        assert_eq!(config.allowed_origins, vec!["https://api.example.com"]);
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() {
        let result: Result<ConfigFile, _> = toml::from_str("port = 3000");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssr.toml");
        std::fs::write(&path, "base = 42").unwrap();

        let err = PipelineConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("ssr.toml"));
    }

    #[test]
    fn test_sandbox_config_uses_entry_dir() {
        let config = PipelineConfig::new().with_server_entry("build/server/entry.js");
        let sandbox = config.sandbox_config().unwrap();
        assert_eq!(sandbox.bundle_dir, PathBuf::from("build/server"));
        assert_eq!(sandbox.timeout_ms, Some(30_000));
    }

    #[test]
    fn test_invalid_app_origin_is_rejected() {
        let file: ConfigFile = toml::from_str(r#"app_origin = "not a url""#).unwrap();
        let err = file.into_config().unwrap_err();
        match err {
            ConfigError::InvalidOrigin { origin, .. } => assert_eq!(origin, "not a url"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_app_origin_from_file() {
        let file: ConfigFile = toml::from_str(r#"app_origin = "http://localhost:3000""#).unwrap();
        let config = file.into_config().unwrap();
        assert_eq!(
            config.app_origin.as_ref().map(url::Url::as_str),
            Some("http://localhost:3000/")
        );
    }
}
