//! Server-side `fetch()` for the render engine.
//!
//! Bundles load page data during render. Only origins on the allow-list can
//! be reached, relative URLs resolve against the app's own origin, and
//! redirects are only followed while they stay on the same allowed origin.

use anyhow::anyhow;
use deno_core::{op2, OpState};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use url::Url;

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 5;

/// Configuration for the fetch allow-list
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Allowed origins (scheme + host + port, e.g. "https://api.example.com")
    pub allowed_origins: Vec<String>,
    /// Origin that relative URLs like "/api/items" resolve against
    pub app_origin: Option<Url>,
    /// `None` refuses every request
    client: Option<Client>,
}

impl FetchConfig {
    pub fn new(allowed_origins: Vec<String>, app_origin: Option<Url>) -> reqwest::Result<Self> {
        // Redirects are handled by hand so each hop can be checked
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            allowed_origins,
            app_origin,
            client: Some(client),
        })
    }

    /// A configuration with fetch turned off.
    pub fn disabled() -> Self {
        Self {
            allowed_origins: Vec::new(),
            app_origin: None,
            client: None,
        }
    }

    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
            || self
                .app_origin
                .as_ref()
                .is_some_and(|app| app.origin() == url.origin())
    }

    /// Parse a request URL, resolving relative ones against the app origin.
    pub fn resolve(&self, raw: &str) -> anyhow::Result<Url> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .app_origin
                    .as_ref()
                    .ok_or_else(|| anyhow!("Relative URL '{}' but no app origin is configured", raw))?;
                base.join(raw)
                    .map_err(|e| anyhow!("Invalid URL '{}': {}", raw, e))
            }
            Err(e) => Err(anyhow!("Invalid URL '{}': {}", raw, e)),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Request info passed from JS
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Response info returned to JS
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub url: String,
    pub body: String,
}

#[op2(async)]
#[serde]
pub async fn op_fetch(
    state: Rc<RefCell<OpState>>,
    #[serde] request: FetchRequest,
) -> Result<FetchResponse, deno_core::error::AnyError> {
    let config = {
        let state_ref = state.borrow();
        state_ref.borrow::<FetchConfig>().clone()
    };

    do_fetch(request, &config).await.map_err(Into::into)
}

async fn do_fetch(request: FetchRequest, config: &FetchConfig) -> anyhow::Result<FetchResponse> {
    let mut method = parse_method(request.method.as_deref())?;
    let mut url = config.resolve(&request.url)?;
    let origin = url.origin();
    let mut body = request.body;

    for _ in 0..=MAX_REDIRECTS {
        if !config.is_origin_allowed(&url) {
            return Err(anyhow!(
                "Fetch blocked: origin '{}' is not in the allowlist",
                url.origin().ascii_serialization()
            ));
        }

        let client = config
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("Fetch is disabled for this render engine"))?;

        tracing::debug!(%url, %method, "engine fetch");
        let mut req_builder = client.request(method.clone(), url.clone());
        if let Some(ref headers) = request.headers {
            for (key, value) in headers {
                req_builder = req_builder.header(key, value);
            }
        }
        if let Some(ref body) = body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| anyhow!("Fetch failed: {}", e))?;
        let status = response.status();

        if status.is_redirection() {
            if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                let location = location
                    .to_str()
                    .map_err(|_| anyhow!("Invalid redirect location"))?;
                let next = url
                    .join(location)
                    .map_err(|e| anyhow!("Invalid redirect URL: {}", e))?;

                if next.origin() != origin {
                    return Err(anyhow!(
                        "Fetch blocked: redirect to different origin '{}' (original: '{}')",
                        next.origin().ascii_serialization(),
                        origin.ascii_serialization()
                    ));
                }

                // Redirects become GET without a body
                url = next;
                method = Method::GET;
                body = None;
                continue;
            }
        }

        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

        return Ok(FetchResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers,
            url: final_url,
            body: text,
        });
    }

    Err(anyhow!("Fetch failed: more than {} redirects", MAX_REDIRECTS))
}

fn parse_method(method: Option<&str>) -> anyhow::Result<Method> {
    match method.unwrap_or("GET").to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(anyhow!("Unsupported HTTP method: {}", other)),
    }
}
