/// DisplayCore: single-owner event loop for one screen.
///
/// Owns the screen's `Reconciler`, `Presenter` and `RotationScheduler`
/// exclusively.  Inputs are the shared channel subscription, the shared
/// catalog snapshot, the rotation tick, the fade timer and the one-shot HTTP
/// seed; after every input the picture is published as a `SurfaceFrame`.
///
/// Rotation and manual control are symmetric writers: a rotation step goes
/// through the same `pick` as a remote operator and is broadcast, so every
/// client watching the screen converges.
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use springboard_proto::catalog::{Catalog, CatalogClient, CatalogHandle, Destination};
use springboard_proto::channel::Channel;
use springboard_proto::config::DisplayConfig;
use springboard_proto::protocol::{events, ChannelEvent, ScreenId};
use springboard_proto::reconciler::{Outcome, Reconciler};

use crate::presenter::{Presenter, Step};
use crate::rotation::RotationScheduler;
use crate::surface::{Chrome, Layout, SurfaceFrame};

const SUBSCRIBED: &[&str] = &[
    events::CONNECT,
    events::DISCONNECT,
    events::CHANGE_URL,
    events::CURRENT_URL_STATE,
    events::CURRENT_URL_STATES,
    events::ERROR,
];

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct DisplayCore {
    screen: ScreenId,
    fade: Duration,
    chrome: Chrome,
    /// Stacked-frames mode: no presenter, the surface scrolls.
    preload: bool,
    channel: Channel,
    catalog: CatalogHandle,
    /// Answers `current-url` once at startup.  Screen "A" only.
    seed_client: Option<CatalogClient>,
    reconciler: Reconciler,
    rotation: RotationScheduler,
    /// Present while rotating with a resolved selection.
    presenter: Option<Presenter>,
    /// Last destination shown in single mode.  Survives demotion so the
    /// screen never goes blank on a bad refresh.
    shown: Option<Destination>,
    connected: bool,
    rng: StdRng,
    frame_tx: watch::Sender<SurfaceFrame>,
}

impl DisplayCore {
    pub fn new(
        screen: ScreenId,
        config: &DisplayConfig,
        channel: Channel,
        catalog: CatalogHandle,
    ) -> Self {
        let chrome = Chrome::from_config(config);
        let (frame_tx, _) = watch::channel(SurfaceFrame::blank(screen.clone(), chrome.clone()));
        Self {
            reconciler: Reconciler::new(screen.clone()),
            rotation: RotationScheduler::new(config.slideshow, config.rotation_interval()),
            screen,
            fade: config.fade(),
            chrome,
            preload: config.preload,
            channel,
            catalog,
            seed_client: None,
            presenter: None,
            shown: None,
            connected: false,
            rng: StdRng::from_entropy(),
            frame_tx,
        }
    }

    pub fn with_seed(mut self, client: CatalogClient) -> Self {
        self.seed_client = Some(client);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn frames(&self) -> watch::Receiver<SurfaceFrame> {
        self.frame_tx.subscribe()
    }

    /// Runs until `cancel` fires.  Dropping out of the loop detaches the
    /// channel subscription and every timer.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("[{}] display core starting", self.screen);
        let mut events = self.channel.subscribe(SUBSCRIBED);
        let mut catalog_rx = self.catalog.subscribe();
        let mut catalog_open = true;

        let (seed_tx, mut seed_rx) = mpsc::unbounded_channel::<String>();
        if let Some(client) = self.seed_client.take().filter(|_| self.screen.is_default()) {
            let seed_cancel = cancel.clone();
            tokio::spawn(async move {
                let fetched = tokio::select! {
                    _ = seed_cancel.cancelled() => return,
                    r = client.fetch_current() => r,
                };
                match fetched {
                    Ok(Some(id)) => {
                        let _ = seed_tx.send(id);
                    }
                    Ok(None) => debug!("no current selection on the server"),
                    Err(e) => warn!("current-url lookup failed: {}", e),
                }
            });
        }

        let initial = catalog_rx.borrow_and_update().clone();
        self.on_catalog(initial);
        if self.channel.state().is_connected() {
            self.on_connected();
        }
        self.publish();

        loop {
            let fade_at = self.presenter.as_ref().and_then(Presenter::deadline);
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        warn!("[{}] channel subscription closed", self.screen);
                        break;
                    }
                },
                changed = catalog_rx.changed(), if catalog_open => {
                    if changed.is_err() {
                        warn!("[{}] catalog refresher stopped", self.screen);
                        catalog_open = false;
                    } else {
                        let snapshot = catalog_rx.borrow_and_update().clone();
                        self.on_catalog(snapshot);
                    }
                }
                _ = self.rotation.tick() => self.on_rotation_tick(),
                _ = wait_until(fade_at) => self.on_fade_deadline(),
                Some(id) = seed_rx.recv() => self.on_seed(&id),
            }
            self.publish();
        }

        info!("[{}] display core stopped", self.screen);
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    fn on_event(&mut self, event: ChannelEvent) {
        match &event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::Disconnected => {
                self.connected = false;
                info!("[{}] channel lost, showing last content", self.screen);
            }
            ChannelEvent::Error(data) => warn!("[{}] server error: {}", self.screen, data),
            _ => {
                if self.reconciler.handle(&event) == Outcome::Changed {
                    self.follow_selection();
                }
            }
        }
    }

    /// Every (re)connect: the server is fresher than anything held here.
    fn on_connected(&mut self) {
        self.connected = true;
        self.channel.emit(self.reconciler.request_current());
        self.catalog.request_refresh();
    }

    fn on_catalog(&mut self, snapshot: Arc<Catalog>) {
        let outcome = self.reconciler.on_catalog(Arc::clone(&snapshot));
        self.rotation.update(snapshot.len());
        // Same id, possibly a new address or title.
        if let Some(fresh) = self
            .shown
            .as_ref()
            .and_then(|shown| snapshot.lookup(&shown.id))
            .cloned()
        {
            self.shown = Some(fresh);
        }
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.on_catalog(&snapshot, &mut self.rng);
        }
        if outcome == Outcome::Changed {
            self.follow_selection();
        }
        self.sync_presenter();
    }

    fn on_seed(&mut self, id: &str) {
        if self.reconciler.seed(id) == Outcome::Changed {
            debug!("[{}] seeded from current-url: '{}'", self.screen, id);
            self.follow_selection();
        }
    }

    fn on_rotation_tick(&mut self) {
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.trigger();
            return;
        }
        // No crossfade running: preload mode, or nothing resolved yet.
        let catalog = Arc::clone(self.reconciler.catalog());
        if let Some(target) = catalog.random_other(self.reconciler.current(), &mut self.rng) {
            let id = target.id.clone();
            self.pick(&id);
        }
    }

    fn on_fade_deadline(&mut self) {
        let catalog = Arc::clone(self.reconciler.catalog());
        let Some(presenter) = self.presenter.as_mut() else {
            return;
        };
        match presenter.advance(&catalog, &mut self.rng) {
            Some(Step::Covered {
                current,
                announce: true,
            }) => self.pick(&current),
            Some(Step::Covered {
                current,
                announce: false,
            }) => debug!("[{}] transition settled on '{}'", self.screen, current),
            Some(Step::Finished { follow_up: true }) => {
                debug!("[{}] follow-up transition started", self.screen)
            }
            Some(Step::Finished { follow_up: false }) | None => {}
        }
    }

    // ── State plumbing ────────────────────────────────────────────────────────

    /// Local selection: optimistic resolve + broadcast.
    fn pick(&mut self, id: &str) {
        match self.reconciler.pick(id) {
            Ok(Some(outbound)) => {
                info!("[{}] rotating to '{}'", self.screen, id);
                self.channel.emit(outbound);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("[{}] rotation pick failed: {}", self.screen, e);
                return;
            }
        }
        self.shown = self.reconciler.catalog().lookup(id).cloned();
        self.sync_presenter();
    }

    /// The reconciler moved to a new resolved id; show it.
    fn follow_selection(&mut self) {
        let Some(destination) = self
            .reconciler
            .current()
            .and_then(|id| self.reconciler.catalog().lookup(id))
            .cloned()
        else {
            return;
        };
        self.shown = Some(destination.clone());
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.select(destination);
        }
        self.sync_presenter();
    }

    /// Creates the presenter on the first resolution while rotation is armed,
    /// drops it when rotation disarms.
    fn sync_presenter(&mut self) {
        if self.preload || !self.rotation.is_armed() {
            if let Some(presenter) = self.presenter.take() {
                info!(
                    "[{}] rotation stopped on '{}'",
                    self.screen,
                    presenter.visible().id
                );
            }
            return;
        }
        if self.presenter.is_some() {
            return;
        }
        let catalog = Arc::clone(self.reconciler.catalog());
        let Some(current) = self
            .reconciler
            .current()
            .and_then(|id| catalog.lookup(id))
            .cloned()
        else {
            return;
        };
        let Some(next) = catalog
            .random_other(Some(current.id.as_str()), &mut self.rng)
            .cloned()
        else {
            return;
        };
        info!(
            "[{}] rotation started on '{}', preloading '{}'",
            self.screen, current.id, next.id
        );
        self.presenter = Some(Presenter::new(current, next, self.fade));
    }

    fn frame(&self) -> SurfaceFrame {
        let layout = match (&self.presenter, &self.shown) {
            _ if self.preload => Layout::preloaded(
                self.reconciler.catalog(),
                self.shown.as_ref().map(|d| d.id.as_str()),
                self.chrome.show_labels,
            ),
            (Some(presenter), _) => Layout::rotating(presenter),
            (None, Some(content)) => Layout::Single {
                content: content.clone(),
            },
            (None, None) => Layout::Blank,
        };
        SurfaceFrame {
            screen: self.screen.clone(),
            connected: self.connected,
            selection: self.reconciler.current().map(str::to_string),
            pending: self.reconciler.state().pending().map(str::to_string),
            layout,
            chrome: self.chrome.clone(),
        }
    }

    fn publish(&self) {
        let frame = self.frame();
        self.frame_tx.send_if_modified(move |current| {
            if *current != frame {
                *current = frame;
                true
            } else {
                false
            }
        });
    }
}
