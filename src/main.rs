//! SSR pipeline CLI
//!
//! Server mode:
//!   ssr-pipeline serve [--config ssr.toml] [--addr 127.0.0.1:3000] [--dev]
//!
//! Single-shot mode (renders one URL through the full pipeline):
//!   ssr-pipeline render /products?page=2
//!
//!   The body is written to stdout and the status line to stderr. The exit
//!   code is non-zero for 5xx responses.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ssr_pipeline::logging::{init_tracing, LogFormat};
use ssr_pipeline::watch::watch_server_bundle;
use ssr_pipeline::{
    AppTemplate, DevBundleMiddleware, Dispatcher, EngineSlot, PipelineConfig, RequestParts,
    SandboxRenderer,
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ssr-pipeline", version, about = "Server-side rendering pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, value_enum, default_value_t, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Serve HTTP requests until Ctrl-C
    Serve {
        #[arg(long, env = "SSR_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Render a single URL and print the response body
    Render {
        url: String,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// TOML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Development mode
    #[arg(long, env = "SSR_DEV")]
    dev: bool,

    /// Router base prefix
    #[arg(long, env = "SSR_BASE")]
    base: Option<String>,

    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Client build output
    #[arg(long)]
    dist_dir: Option<PathBuf>,

    /// Server bundle entry module
    #[arg(long)]
    server_entry: Option<PathBuf>,

    /// HTML document template
    #[arg(long)]
    template: Option<PathBuf>,
}

impl PipelineArgs {
    fn load(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::new(),
        };
        if self.dev {
            config = config.with_dev(true);
        }
        if let Some(base) = self.base {
            config = config.with_base(base)?;
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
        Ok(config)
    }
}

/// The dispatcher plus whatever must stay alive alongside it.
struct App {
    dispatcher: Arc<Dispatcher>,
    _watcher: Option<notify::RecommendedWatcher>,
}

fn build_app(config: PipelineConfig) -> Result<App> {
    let template = AppTemplate::load(config.template_path.as_deref())?;
    let config = Arc::new(config);
    let slot = EngineSlot::empty();

    let watcher = if config.dev {
        Some(watch_server_bundle(
            &config.server_entry,
            config.sandbox_config()?,
            slot.clone(),
        )?)
    } else {
        // A missing build is reported by Dispatcher::check_ready
        if config.server_entry.is_file() {
            let engine = SandboxRenderer::spawn(config.sandbox_config()?, &config.server_entry)?;
            slot.set(Arc::new(engine));
        }
        None
    };

    let mut dispatcher = Dispatcher::new(config.clone(), slot, template);
    if config.dev {
        dispatcher = dispatcher.with_dev_middleware(Arc::new(DevBundleMiddleware::new(
            config.bundle_pattern.clone(),
            config.base.clone(),
            &config.dist_dir,
        )));
    }

    Ok(App {
        dispatcher: Arc::new(dispatcher),
        _watcher: watcher,
    })
}

async fn run_render(app: App, url: String) -> Result<bool> {
    app.dispatcher.check_ready()?;
    let response = app.dispatcher.handle(RequestParts::get(url)).await?;

    eprintln!("{}", response.status());
    let mut stdout = std::io::stdout();
    stdout.write_all(response.body())?;
    stdout.flush()?;

    Ok(!response.status().is_server_error())
}

async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Serve { addr, pipeline } => {
            let app = build_app(pipeline.load()?)?;
            ssr_pipeline::server::serve(addr, app.dispatcher.clone()).await?;
            Ok(true)
        }
        Command::Render { url, pipeline } => {
            let app = build_app(pipeline.load()?)?;
            run_render(app, url).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "ssr-pipeline failed");
            std::process::exit(1);
        }
    }
}
