//! Destination catalog: wire decoding, the point-in-time snapshot, the HTTP
//! client for the catalog API and the fail-soft cache in front of it.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Query parameter the catalog API reads the key from.
pub const API_KEY_PARAM: &str = "fccApiKey";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid catalog URL '{0}'")]
    Url(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("malformed catalog: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A selectable page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub id: String,
    pub title: String,
    pub address: String,
}

impl Destination {
    pub fn new(id: impl Into<String>, title: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            address: address.into(),
        }
    }

    /// Title for lists and labels, falling back to the id.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

/// Wire shape: `{ id | _id, title, url }`.  Kept apart from `Destination` so
/// the API can grow fields without touching the rest of the crate.
#[derive(Debug, Deserialize)]
struct RawDestination {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "_id")]
    object_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

pub fn parse_destinations(value: Value) -> Result<Vec<Destination>, CatalogError> {
    let raw: Vec<RawDestination> = serde_json::from_value(value)?;
    Ok(raw
        .into_iter()
        .filter_map(|r| {
            let id = r.id.filter(|id| !id.is_empty()).or(r.object_id);
            match id {
                Some(id) => Some(Destination {
                    id,
                    title: r.title,
                    address: r.url,
                }),
                None => {
                    warn!("catalog entry '{}' has no id, skipping", r.title);
                    None
                }
            }
        })
        .collect())
}

// ── Catalog snapshot ──────────────────────────────────────────────────────────

/// Point-in-time list of destinations, in the order the API returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<Destination>,
}

impl Catalog {
    pub fn new(entries: Vec<Destination>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|d| {
                let fresh = seen.insert(d.id.clone());
                if !fresh {
                    warn!("duplicate catalog id '{}', keeping the first entry", d.id);
                }
                fresh
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[Destination] {
        &self.entries
    }

    pub fn lookup(&self, id: &str) -> Option<&Destination> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.id.as_str())
    }

    /// Uniform pick over `catalog \ {exclude}`.
    pub fn random_other<R: Rng + ?Sized>(
        &self,
        exclude: Option<&str>,
        rng: &mut R,
    ) -> Option<&Destination> {
        let candidates: Vec<&Destination> = self
            .entries
            .iter()
            .filter(|d| Some(d.id.as_str()) != exclude)
            .collect();
        candidates.choose(rng).copied()
    }
}

// ── HTTP client ───────────────────────────────────────────────────────────────

/// Read-only client for the catalog API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    with_templates: bool,
}

impl CatalogClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        with_templates: bool,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("springboard/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            with_templates,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        let raw = format!("{}/{}", self.base_url, path);
        let mut url = Url::parse(&raw).map_err(|_| CatalogError::Url(raw.clone()))?;
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair(API_KEY_PARAM, key);
        }
        Ok(url)
    }

    /// `GET /urls` (or `/urls-with-templates` when address templates are on).
    pub async fn fetch_destinations(&self) -> Result<Vec<Destination>, CatalogError> {
        let path = if self.with_templates {
            "urls-with-templates"
        } else {
            "urls"
        };
        let body = self.get_json(self.endpoint(path)?).await?;
        parse_destinations(body)
    }

    /// `GET /current-url` → `{ id }`.  The endpoint is not screen-scoped.
    pub async fn fetch_current(&self) -> Result<Option<String>, CatalogError> {
        let body = self.get_json(self.endpoint("current-url")?).await?;
        Ok(body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }

    async fn get_json(&self, url: Url) -> Result<Value, CatalogError> {
        debug!("GET {}", url.path());
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            return Err(CatalogError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

// ── Fail-soft cache ───────────────────────────────────────────────────────────

/// Last-known-good catalog.  A failed refresh never replaces the snapshot.
#[derive(Debug, Default)]
pub struct CatalogCache {
    snapshot: Arc<Catalog>,
    last_error: Option<String>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.snapshot)
    }

    pub fn lookup(&self, id: &str) -> Option<&Destination> {
        self.snapshot.lookup(id)
    }

    pub fn size(&self) -> usize {
        self.snapshot.len()
    }

    /// Message of the most recent failed refresh, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn absorb(&mut self, fetched: Result<Vec<Destination>, CatalogError>) -> Arc<Catalog> {
        match fetched {
            Ok(destinations) => {
                self.snapshot = Arc::new(Catalog::new(destinations));
                self.last_error = None;
            }
            Err(e) => {
                warn!(
                    "catalog refresh failed, keeping {} cached destinations: {}",
                    self.snapshot.len(),
                    e
                );
                self.last_error = Some(e.to_string());
            }
        }
        self.snapshot()
    }

    pub async fn refresh(&mut self, client: &CatalogClient) -> Arc<Catalog> {
        let fetched = client.fetch_destinations().await;
        self.absorb(fetched)
    }
}

// ── Shared refresher ──────────────────────────────────────────────────────────

/// Handle to the process-wide refresher task.  Every screen watches the same
/// snapshot.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    refresh_tx: mpsc::UnboundedSender<()>,
    snapshot_rx: watch::Receiver<Arc<Catalog>>,
    error_rx: watch::Receiver<Option<String>>,
}

impl CatalogHandle {
    pub fn subscribe(&self) -> watch::Receiver<Arc<Catalog>> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.error_rx.clone()
    }

    pub fn request_refresh(&self) {
        let _ = self.refresh_tx.send(());
    }

    /// Handle fed by hand instead of the HTTP refresher.  Refresh requests
    /// land on the returned receiver.
    pub fn manual(
        initial: Arc<Catalog>,
    ) -> (
        CatalogHandle,
        watch::Sender<Arc<Catalog>>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (_, error_rx) = watch::channel(None);
        (
            CatalogHandle {
                refresh_tx,
                snapshot_rx,
                error_rx,
            },
            snapshot_tx,
            refresh_rx,
        )
    }
}

/// Refreshes immediately, then every `period` and whenever a refresh is requested.
pub fn spawn_refresher(
    client: CatalogClient,
    period: Duration,
    cancel: CancellationToken,
) -> CatalogHandle {
    let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<()>();
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Catalog::default()));
    let (error_tx, error_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut cache = CatalogCache::new();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                req = refresh_rx.recv() => {
                    if req.is_none() {
                        break;
                    }
                    // Coalesce a burst of requests (several screens reconnecting).
                    while refresh_rx.try_recv().is_ok() {}
                }
            }

            let snapshot = cache.refresh(&client).await;
            let _ = error_tx.send(cache.last_error().map(str::to_string));
            let changed = snapshot_tx.send_if_modified(|current| {
                if **current != *snapshot {
                    *current = Arc::clone(&snapshot);
                    true
                } else {
                    false
                }
            });
            if changed {
                info!("catalog updated: {} destinations", snapshot.len());
            }
        }
        debug!("catalog refresher stopped");
    });

    CatalogHandle {
        refresh_tx,
        snapshot_rx,
        error_rx,
    }
}
