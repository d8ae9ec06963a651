use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use super::platform;
use crate::catalog::API_KEY_PARAM;
use crate::protocol::{ScreenId, DEFAULT_SCREEN};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Realtime channel server (`http://` or `https://`).
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// Base URL of the catalog API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    /// Fetch `/urls-with-templates` instead of `/urls`.
    #[serde(default)]
    pub with_templates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    #[default]
    Log,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_screens")]
    pub screens: Vec<String>,
    #[serde(default)]
    pub slideshow: bool,
    /// Keep every catalog entry loaded as a stacked frame and scroll to the
    /// selection instead of reloading.
    #[serde(default)]
    pub preload: bool,
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
    #[serde(default)]
    pub surface: SurfaceKind,
    #[serde(default)]
    pub on_device: bool,
    #[serde(default)]
    pub show_fullscreen_button: bool,
    #[serde(default)]
    pub show_labels: bool,
    #[serde(default)]
    pub top_offset: u32,
    #[serde(default)]
    pub bottom_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Screens the remote can cycle through with `[` / `]`.
    #[serde(default = "default_screens")]
    pub screens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            api_url: default_api_url(),
            api_key: None,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
            with_templates: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            screens: default_screens(),
            slideshow: false,
            preload: false,
            rotation_interval_secs: default_rotation_interval_secs(),
            fade_ms: default_fade_ms(),
            surface: SurfaceKind::default(),
            on_device: false,
            show_fullscreen_button: false,
            show_labels: false,
            top_offset: 0,
            bottom_offset: 0,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            screens: default_screens(),
        }
    }
}

fn default_socket_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_refresh_secs() -> u64 {
    300
}

fn default_screens() -> Vec<String> {
    vec![DEFAULT_SCREEN.to_string()]
}

fn default_rotation_interval_secs() -> u64 {
    60
}

fn default_fade_ms() -> u64 {
    500
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "true" | "1")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Applies a kiosk query string (`screen=B&slideshow=true&...`) on top of
    /// the file values.  Unknown keys are ignored; unparsable numbers keep
    /// the previous value.
    pub fn apply_query(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        let Ok(url) = Url::parse(&format!("kiosk:///?{}", query)) else {
            warn!("ignoring unparsable query string '{}'", query);
            return;
        };

        let display = &mut self.display;
        let mut api_key = None;
        let mut legacy_api_key = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "screen" if !value.is_empty() => display.screens = vec![value.into_owned()],
                "slideshow" => display.slideshow = parse_flag(&value),
                "preload" => display.preload = parse_flag(&value),
                "rotationInterval" => match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => display.rotation_interval_secs = secs,
                    _ => warn!("ignoring rotationInterval='{}'", value),
                },
                "onDevice" => display.on_device = parse_flag(&value),
                "showFullscreenButton" => display.show_fullscreen_button = parse_flag(&value),
                "showLabels" => display.show_labels = parse_flag(&value),
                "topOffset" => match value.parse() {
                    Ok(px) => display.top_offset = px,
                    Err(_) => warn!("ignoring topOffset='{}'", value),
                },
                "bottomOffset" => match value.parse() {
                    Ok(px) => display.bottom_offset = px,
                    Err(_) => warn!("ignoring bottomOffset='{}'", value),
                },
                API_KEY_PARAM => api_key = Some(value.into_owned()),
                "apiKey" => legacy_api_key = Some(value.into_owned()),
                _ => {}
            }
        }
        if let Some(key) = api_key.or(legacy_api_key).filter(|k| !k.is_empty()) {
            self.server.api_key = Some(key);
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.server.retry_delay_ms)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.catalog.refresh_secs.max(1))
    }
}

impl DisplayConfig {
    pub fn screen_ids(&self) -> Vec<ScreenId> {
        screen_ids(&self.screens)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs.max(1))
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }
}

impl RemoteConfig {
    pub fn screen_ids(&self) -> Vec<ScreenId> {
        screen_ids(&self.screens)
    }
}

/// Deduplicated, never empty.
fn screen_ids(names: &[String]) -> Vec<ScreenId> {
    let mut ids: Vec<ScreenId> = Vec::new();
    for name in names.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let id = ScreenId::new(name);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        ids.push(ScreenId::default());
    }
    ids
}
