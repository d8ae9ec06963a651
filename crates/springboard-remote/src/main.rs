mod action;
mod app;
mod intent;
mod theme;
mod ui;

use clap::Parser;
use springboard_proto::catalog::{spawn_refresher, CatalogClient};
use springboard_proto::channel::Channel;
use springboard_proto::config::Config;
use tokio_util::sync::CancellationToken;

use crate::app::App;

/// Remote control: picks what each kiosk screen shows.
#[derive(Parser, Debug)]
#[command(name = "springboard-remote", version)]
struct Args {
    /// Screen to control (repeat to switch between several with [ and ])
    #[arg(long = "screen", value_name = "ID")]
    screens: Vec<String>,

    /// Realtime server URL
    #[arg(long)]
    server: Option<String>,

    /// Catalog API base URL
    #[arg(long)]
    api: Option<String>,

    #[arg(long)]
    api_key: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if !self.screens.is_empty() {
            config.remote.screens = self.screens.clone();
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
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = springboard_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = springboard_proto::platform::log_path("remote");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // The terminal belongs to the UI, so everything goes to the file.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "debug,hyper_util=warn,reqwest=warn,hyper=warn,tungstenite=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("springboard-remote log: {}", log_path.display());
    tracing::info!("springboard-remote starting…");

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config unreadable, using defaults: {}", e);
        Config::default()
    });
    args.apply(&mut config);

    let cancel = CancellationToken::new();
    let channel = Channel::new(&config.server.socket_url, config.retry_delay())?;
    let client = CatalogClient::new(
        &config.server.api_url,
        config.server.api_key.clone(),
        config.catalog.with_templates,
    )?;
    let catalog = spawn_refresher(client, config.refresh_period(), cancel.clone());
    channel.connect();

    let app = App::new(config.remote.screen_ids(), channel.clone(), catalog);
    let result = app.run().await;

    cancel.cancel();
    channel.shutdown();
    result
}
