//! What a display shows, and the sinks that show it.
//!
//! The core publishes a [`SurfaceFrame`] on a `watch` channel whenever the
//! picture changes.  A surface task renders each frame: `log` writes it to
//! the log, `jsonl` prints one JSON object per frame to stdout for the
//! browser controller that drives the actual frames.

use serde::Serialize;
use std::io::Write;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use springboard_proto::catalog::{Catalog, Destination};
use springboard_proto::config::DisplayConfig;
use springboard_proto::protocol::ScreenId;

use crate::presenter::{Phase, Presenter, Slot};

/// Cursor and layout hints.  Presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chrome {
    /// Hidden on devices unless a fullscreen button is offered; the browser
    /// controller hides it again once it actually is fullscreen.
    pub hide_cursor: bool,
    pub show_fullscreen_button: bool,
    pub show_labels: bool,
    pub top_offset: u32,
    pub bottom_offset: u32,
}

impl Chrome {
    pub fn from_config(config: &DisplayConfig) -> Self {
        Self {
            hide_cursor: config.on_device && !config.show_fullscreen_button,
            show_fullscreen_button: config.show_fullscreen_button,
            show_labels: config.show_labels,
            top_offset: config.top_offset,
            bottom_offset: config.bottom_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferView {
    pub slot: Slot,
    pub destination: Destination,
}

/// One stacked frame in preload mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreloadedEntry {
    pub destination: Destination,
    /// Title, or id when untitled.  Only set when labels are on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Layout {
    /// Nothing resolved yet.
    Blank,
    Single {
        content: Destination,
    },
    Rotating {
        visible: Slot,
        buffers: [BufferView; 2],
        phase: Phase,
        overlay: f32,
    },
    /// Every catalog entry stays loaded; the surface scrolls to `current`
    /// without reloading anything.
    Preloaded {
        entries: Vec<PreloadedEntry>,
        current: Option<String>,
    },
}

impl Layout {
    pub fn rotating(presenter: &Presenter) -> Self {
        let view = |slot: Slot| BufferView {
            slot,
            destination: presenter.buffer(slot).clone(),
        };
        Self::Rotating {
            visible: presenter.visible_slot(),
            buffers: [view(Slot::One), view(Slot::Two)],
            phase: presenter.phase(),
            overlay: presenter.overlay_target(),
        }
    }

    pub fn preloaded(catalog: &Catalog, current: Option<&str>, labels: bool) -> Self {
        let entries = catalog
            .entries()
            .iter()
            .map(|destination| PreloadedEntry {
                label: labels.then(|| destination.label().to_string()),
                destination: destination.clone(),
            })
            .collect();
        Self::Preloaded {
            entries,
            current: current.filter(|id| catalog.contains(id)).map(str::to_string),
        }
    }

    /// Destination currently on screen.
    pub fn on_screen(&self) -> Option<&Destination> {
        match self {
            Self::Blank => None,
            Self::Preloaded { entries, current } => current.as_ref().and_then(|id| {
                entries
                    .iter()
                    .map(|e| &e.destination)
                    .find(|d| &d.id == id)
            }),
            Self::Single { content } => Some(content),
            Self::Rotating {
                visible, buffers, ..
            } => buffers
                .iter()
                .find(|b| b.slot == *visible)
                .map(|b| &b.destination),
        }
    }

    /// Destination preloaded off-screen, in rotating mode.
    pub fn off_screen(&self) -> Option<&Destination> {
        match self {
            Self::Rotating {
                visible, buffers, ..
            } => buffers
                .iter()
                .find(|b| b.slot != *visible)
                .map(|b| &b.destination),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceFrame {
    pub screen: ScreenId,
    pub connected: bool,
    /// Reconciled selection; `None` while unresolved or pending.
    pub selection: Option<String>,
    pub pending: Option<String>,
    pub layout: Layout,
    pub chrome: Chrome,
}

impl SurfaceFrame {
    pub fn blank(screen: ScreenId, chrome: Chrome) -> Self {
        Self {
            screen,
            connected: false,
            selection: None,
            pending: None,
            layout: Layout::Blank,
            chrome,
        }
    }
}

pub trait Surface: Send {
    fn render(&mut self, frame: &SurfaceFrame) -> anyhow::Result<()>;
}

pub struct LogSurface;

impl Surface for LogSurface {
    fn render(&mut self, frame: &SurfaceFrame) -> anyhow::Result<()> {
        let status = if frame.connected { "online" } else { "offline" };
        match &frame.layout {
            Layout::Blank => info!("[{}] {} blank", frame.screen, status),
            Layout::Single { content } => info!(
                "[{}] {} showing '{}' {}",
                frame.screen,
                status,
                content.label(),
                content.address
            ),
            Layout::Preloaded { entries, .. } => info!(
                "[{}] {} scrolled to '{}' of {} preloaded",
                frame.screen,
                status,
                frame.layout.on_screen().map_or("", |d| d.label()),
                entries.len()
            ),
            Layout::Rotating { phase, .. } => info!(
                "[{}] {} rotating '{}' next '{}' ({:?})",
                frame.screen,
                status,
                frame.layout.on_screen().map_or("", |d| d.label()),
                frame.layout.off_screen().map_or("", |d| d.label()),
                phase
            ),
        }
        Ok(())
    }
}

pub struct JsonlSurface<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonlSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonlSurface<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Surface for JsonlSurface<W> {
    fn render(&mut self, frame: &SurfaceFrame) -> anyhow::Result<()> {
        // One write per line so screens sharing stdout never interleave.
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.out.write_all(&line)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Renders the current frame, then every change until cancelled or the core
/// goes away.
pub async fn run_surface(
    mut surface: Box<dyn Surface>,
    mut frames: watch::Receiver<SurfaceFrame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = frames.borrow_and_update().clone();
        if let Err(e) = surface.render(&frame) {
            warn!("[{}] surface render failed: {}", frame.screen, e);
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("surface stopped");
}
