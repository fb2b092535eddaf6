//! HTML document and error templates.

use minijinja::{context, Environment, Value};
use serde::Serialize;
use std::path::Path;

const DEFAULT_APP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html data-ssr-base="{{ base_url }}">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    {%- if not dev %}
    <link rel="stylesheet" href="{{ files.css }}">
    {%- endif %}
  </head>
  <body>
    {{ app }}
    <script>window.__SSR_STATE__ = {{ state }};</script>
    <script src="{{ files.vendor }}" defer></script>
    <script src="{{ files.app }}" defer></script>
  </body>
</html>
"#;

const DEFAULT_ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Server error</title>
  </head>
  <body>
    <h1>Server error</h1>
    <p>{{ err.message }}</p>
    {%- if dev %}
    <pre>{% for cause in err.causes %}{{ cause }}
{% endfor %}</pre>
    {%- endif %}
  </body>
</html>
"#;

/// Public URLs of the client bundles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFiles {
    pub app: String,
    pub vendor: String,
    pub css: String,
}

/// Variables available to the document template.
#[derive(Debug)]
pub struct AppTemplateVars<'a> {
    pub dev: bool,
    pub base_url: &'a str,
    /// Application markup, inserted unescaped
    pub app: &'a str,
    /// Serialized render context
    pub context: serde_json::Value,
    /// Script-safe JSON of the hydration state, inserted unescaped
    pub state: &'a str,
    pub files: &'a AssetFiles,
}

/// The HTML document wrapped around the application markup.
#[derive(Debug, Clone)]
pub struct AppTemplate {
    source: String,
}

impl AppTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Load the template from `path`, or use the built-in document.
    pub fn load(path: Option<&Path>) -> std::io::Result<Self> {
        match path {
            Some(path) => Ok(Self::new(std::fs::read_to_string(path)?)),
            None => Ok(Self::default()),
        }
    }

    pub fn render(&self, vars: &AppTemplateVars<'_>) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        // The .html name turns on autoescaping
        env.add_template("app.html", &self.source)?;
        let tmpl = env.get_template("app.html")?;
        // Configured paths are trusted; the HTML escaper would mangle their slashes
        tmpl.render(context! {
            dev => vars.dev,
            base_url => Value::from_safe_string(vars.base_url.to_string()),
            app => Value::from_safe_string(vars.app.to_string()),
            context => Value::from_serialize(&vars.context),
            state => Value::from_safe_string(vars.state.to_string()),
            files => context! {
                app => Value::from_safe_string(vars.files.app.clone()),
                vendor => Value::from_safe_string(vars.files.vendor.clone()),
                css => Value::from_safe_string(vars.files.css.clone()),
            },
        })
    }
}

impl Default for AppTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_APP_TEMPLATE)
    }
}

/// Page sent with a 500 when the pipeline fails.
#[derive(Debug, Clone)]
pub struct ErrorTemplate {
    source: String,
    dev: bool,
}

impl ErrorTemplate {
    pub fn new(dev: bool) -> Self {
        Self {
            source: DEFAULT_ERROR_TEMPLATE.to_string(),
            dev,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Render the page for `err`. Never fails: a broken template falls back
    /// to a fixed page.
    pub fn render(&self, err: &anyhow::Error) -> String {
        let causes: Vec<String> = err.chain().map(ToString::to_string).collect();
        let rendered = (|| {
            let mut env = Environment::new();
            env.add_template("error.html", &self.source)?;
            env.get_template("error.html")?.render(context! {
                dev => self.dev,
                err => context! {
                    message => err.to_string(),
                    causes => causes,
                },
            })
        })();

        match rendered {
            Ok(html) => html,
            Err(template_err) => {
                tracing::error!(error = %template_err, "error template failed, using fallback page");
                format!(
                    "<!DOCTYPE html><html><body><h1>Server error</h1><p>{}</p></body></html>",
                    escape_html(&err.to_string())
                )
            }
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize hydration state so it can sit inside a `<script>` element.
pub fn script_safe_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(json
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}

/// Join URL segments with `/`, collapsing repeated slashes.
pub fn url_join(parts: &[&str]) -> String {
    let joined = parts.join("/");
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}
