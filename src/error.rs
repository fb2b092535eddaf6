//! Error types for the pipeline.
//!
//! Collaborators report failures as [`anyhow::Error`]; the types here are the
//! ones callers are expected to match on.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while a request moves through the pipeline.
///
/// All of these are recovered by the dispatcher and turned into a 500 page.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request target '{0}'")]
    InvalidRequest(String),

    #[error("render engine is not ready")]
    EngineNotReady,

    #[error("failed to render document template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Misconfigurations the process cannot serve through.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("no build files found at '{}', run the client and server build before starting in production mode", .0.display())]
    MissingBuild(PathBuf),
}

/// Setup failures for the hydration verifier.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no DOM sandbox available: {0}")]
    SandboxUnavailable(&'static str),
}

/// Outcomes of a failed hydration check.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("sandbox failed to load the page: {0}")]
    Load(#[source] anyhow::Error),

    /// The page loaded but the client application never attached.
    #[error("{message}")]
    NotHydrated { message: String, body: String },

    #[error("window dropped the ready callback without firing it")]
    ReadyDropped,
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("router base must start with '/', got '{0}'")]
    InvalidBase(String),

    #[error("assets directory must start with '/', got '{0}'")]
    InvalidAssetsDir(String),

    #[error("invalid app origin '{origin}': {source}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build the engine fetch client: {0}")]
    FetchClient(#[source] reqwest::Error),

    #[error("invalid bundle pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
