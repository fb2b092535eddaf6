//! Per-request render context.
//!
//! A context is built once per request by [`build_context`], threaded through
//! the route renderer and the render engine, and dropped with the response.

use crate::error::PipelineError;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The parts of an incoming request the pipeline looks at.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    /// Request target as received (path and query)
    pub url: String,
    pub headers: HeaderMap,
}

impl RequestParts {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
        }
    }

    /// A bare GET request, used by the CLI and tests.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, HeaderMap::new())
    }
}

/// Error reported by the application while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

/// Redirect requested by the application while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectInfo {
    pub path: String,
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Application state handed to the client for hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub error: Option<ErrorInfo>,
    pub server_rendered: bool,
    pub data: Value,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            error: None,
            server_rendered: true,
            data: Value::Array(Vec::new()),
        }
    }
}

/// Mutable state for one render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    #[serde(skip)]
    pub request: RequestParts,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// URL being rendered, stamped by the route renderer
    pub url: String,
    pub is_server: bool,
    pub query: Map<String, Value>,
    pub state: AppState,
    pub redirected: Option<RedirectInfo>,
}

/// Fields the render engine may write back into the context.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextPatch {
    pub state: Option<AppState>,
    pub redirected: Option<RedirectInfo>,
}

impl RenderContext {
    /// Merge the engine's view of the context back in.
    pub fn apply(&mut self, patch: ContextPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        self.redirected = patch.redirected;
    }
}

/// Derive the render context for a request.
pub fn build_context(request: &RequestParts) -> Result<RenderContext, PipelineError> {
    if !request.url.starts_with('/') {
        return Err(PipelineError::InvalidRequest(request.url.clone()));
    }

    let query = match request.url.split_once('?') {
        Some((_, qs)) => url::form_urlencoded::parse(qs.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect(),
        None => Map::new(),
    };

    let headers = request
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(RenderContext {
        request: request.clone(),
        method: request.method.as_str().to_string(),
        headers,
        url: request.url.clone(),
        is_server: true,
        query,
        state: AppState::default(),
        redirected: None,
    })
}
