//! Module loader for the server bundle.
//!
//! The render engine may only import modules from the directory the server
//! bundle was built into: no network, no data/blob URLs, no escaping the
//! directory, and only `.js`/`.mjs` files.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

/// Loads ES modules from a single bundle directory.
pub struct BundleLoader {
    bundle_dir: PathBuf,
}

impl BundleLoader {
    /// Create a loader rooted at `bundle_dir`.
    ///
    /// Fails if the directory doesn't exist or can't be canonicalized.
    pub fn new(bundle_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let canonical = bundle_dir.as_ref().canonicalize().map_err(|e| {
            anyhow!(
                "Server bundle directory '{}' is not readable: {}",
                bundle_dir.as_ref().display(),
                e
            )
        })?;

        if !canonical.is_dir() {
            return Err(anyhow!(
                "Server bundle path '{}' is not a directory",
                canonical.display()
            ));
        }

        Ok(Self {
            bundle_dir: canonical,
        })
    }

    /// Canonicalize `path` and check it stays inside the bundle directory.
    fn check_path(&self, path: &Path) -> Result<(), Error> {
        let inside = path
            .canonicalize()
            .map(|canonical| canonical.starts_with(&self.bundle_dir))
            .unwrap_or(false);
        if !inside {
            tracing::warn!(path = %path.display(), "engine import outside the server bundle denied");
            return Err(anyhow!(
                "Access denied: '{}' is outside the server bundle",
                path.display()
            ));
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("js") | Some("mjs") => Ok(()),
            _ => Err(anyhow!(
                "Only .js and .mjs modules can be imported, got: {}",
                path.display()
            )),
        }
    }
}

impl ModuleLoader for BundleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if ["http://", "https://", "data:", "blob:"]
            .iter()
            .any(|scheme| specifier.starts_with(scheme))
        {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            let referrer_url = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            referrer_url
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with('/') {
            ModuleSpecifier::from_file_path(specifier)
                .map_err(|_| anyhow!("Invalid absolute path: {}", specifier))?
        } else {
            // Bare specifiers ("chunk-abc123.js") resolve from the bundle root
            ModuleSpecifier::from_file_path(self.bundle_dir.join(specifier))
                .map_err(|_| anyhow!("Invalid bare specifier: {}", specifier))?
        };

        if resolved.scheme() != "file" {
            return Err(anyhow!(
                "Only file:// modules allowed, got: {}",
                resolved.scheme()
            ));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", resolved))?;
        self.check_path(&path)?;

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let load = || -> Result<ModuleSource, Error> {
            let path = module_specifier
                .to_file_path()
                .map_err(|_| anyhow!("Invalid file path: {}", module_specifier))?;
            self.check_path(&path)?;

            let code = std::fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;

            Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            ))
        };

        ModuleLoadResponse::Sync(load())
    }
}
