mod core;
mod presenter;
mod rotation;
mod surface;

use clap::Parser;
use springboard_proto::catalog::{spawn_refresher, CatalogClient};
use springboard_proto::channel::Channel;
use springboard_proto::config::{Config, SurfaceKind};
use tokio_util::sync::CancellationToken;

use crate::core::DisplayCore;
use crate::surface::{run_surface, JsonlSurface, LogSurface, Surface};

/// Kiosk display: keeps one or more screens on the selected page.
#[derive(Parser, Debug)]
#[command(name = "springboard-display", version)]
struct Args {
    /// Screen to drive (repeat to run several screens on one connection)
    #[arg(long = "screen", value_name = "ID")]
    screens: Vec<String>,

    /// Kiosk query string, e.g. "screen=B&slideshow=true&rotationInterval=30"
    #[arg(long)]
    query: Option<String>,

    /// Rotate through the catalog
    #[arg(long)]
    slideshow: bool,

    /// Keep every destination loaded and scroll between them
    #[arg(long)]
    preload: bool,

    /// Seconds between rotation steps
    #[arg(long, value_name = "SECS")]
    rotation_interval: Option<u64>,

    /// Realtime server URL
    #[arg(long)]
    server: Option<String>,

    /// Catalog API base URL
    #[arg(long)]
    api: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    /// Fetch addresses with templates already applied
    #[arg(long)]
    templates: bool,

    /// Print one JSON frame per line on stdout instead of logging frames
    #[arg(long)]
    jsonl: bool,
}

impl Args {
    /// Flags win over the query string, which wins over the config file.
    fn apply(&self, config: &mut Config) {
        if let Some(query) = &self.query {
            config.apply_query(query);
        }
        if !self.screens.is_empty() {
            config.display.screens = self.screens.clone();
        }
        if self.slideshow {
            config.display.slideshow = true;
        }
        if self.preload {
            config.display.preload = true;
        }
        if let Some(secs) = self.rotation_interval {
            config.display.rotation_interval_secs = secs;
        }
        if let Some(server) = &self.server {
            config.server.socket_url = server.clone();
        }
        if let Some(api) = &self.api {
            config.server.api_url = api.clone();
        }
        if let Some(key) = &self.api_key {
            config.server.api_key = Some(key.clone());
        }
        if self.templates {
            config.catalog.with_templates = true;
        }
        if self.jsonl {
            config.display.surface = SurfaceKind::Jsonl;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = springboard_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = springboard_proto::platform::log_path("display");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG overrides; keep HTTP and websocket internals quiet by default.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "debug,hyper_util=warn,reqwest=warn,hyper=warn,tungstenite=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("springboard-display log: {}", log_path.display());
    tracing::info!("springboard-display starting…");

    // ── Config: file, then query string, then flags ─────────────────────────
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config unreadable, using defaults: {}", e);
        Config::default()
    });
    args.apply(&mut config);
    let screens = config.display.screen_ids();
    tracing::info!(
        "screens {:?}, slideshow={}, server {}",
        screens,
        config.display.slideshow,
        config.server.socket_url
    );

    let cancel = CancellationToken::new();

    // ── Shared collaborators: one connection, one catalog ───────────────────
    let channel = Channel::new(&config.server.socket_url, config.retry_delay())?;
    let client = CatalogClient::new(
        &config.server.api_url,
        config.server.api_key.clone(),
        config.catalog.with_templates,
    )?;
    let catalog = spawn_refresher(client.clone(), config.refresh_period(), cancel.clone());
    channel.connect();

    // ── One core per screen ──────────────────────────────────────────────────
    let mut tasks = Vec::new();
    for screen in screens {
        let core = DisplayCore::new(screen, &config.display, channel.clone(), catalog.clone())
            .with_seed(client.clone());
        let surface: Box<dyn Surface> = match config.display.surface {
            SurfaceKind::Log => Box::new(LogSurface),
            SurfaceKind::Jsonl => Box::new(JsonlSurface::stdout()),
        };
        tasks.push(tokio::spawn(run_surface(surface, core.frames(), cancel.clone())));
        tasks.push(tokio::spawn(core.run(cancel.clone())));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    channel.shutdown();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("task ended abnormally: {}", e);
        }
    }
    Ok(())
}
