//! Dual-buffer crossfade presenter.
//!
//! Two content buffers, one visible.  The hidden buffer always holds the
//! next target, preloaded off-screen, and never the visible destination.
//! A transition raises the overlay, swaps buffers while covered, preloads a
//! new target into the buffer that just went hidden and lowers the overlay
//! again.  Transitions never overlap.

use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use springboard_proto::catalog::{Catalog, Destination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// Overlay rising; content unchanged.
    FadingIn,
    /// Overlay falling; the swap already happened.
    FadingOut,
}

/// Result of a fade step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Buffers swapped under the overlay.  `announce` is set when the new
    /// content was chosen by rotation and still has to be broadcast.
    Covered { current: String, announce: bool },
    /// Overlay fully lowered.  `follow_up` is set when a selection that
    /// arrived during the fade-out started another transition.
    Finished { follow_up: bool },
}

#[derive(Debug)]
pub struct Presenter {
    fade: Duration,
    visible: Slot,
    buffers: [Destination; 2],
    phase: Phase,
    deadline: Option<Instant>,
    /// Whether the running transition's target came from rotation.
    rotating: bool,
    /// Selection that arrived mid-transition.  Last write wins.
    queued: Option<Destination>,
}

impl Presenter {
    /// Shows `current` in buffer 1 and preloads `next` into buffer 2.
    pub fn new(current: Destination, next: Destination, fade: Duration) -> Self {
        debug_assert_ne!(current.id, next.id);
        Self {
            fade,
            visible: Slot::One,
            buffers: [current, next],
            phase: Phase::Idle,
            deadline: None,
            rotating: false,
            queued: None,
        }
    }

    pub fn visible_slot(&self) -> Slot {
        self.visible
    }

    pub fn buffer(&self, slot: Slot) -> &Destination {
        &self.buffers[slot.index()]
    }

    pub fn visible(&self) -> &Destination {
        self.buffer(self.visible)
    }

    pub fn hidden(&self) -> &Destination {
        self.buffer(self.visible.other())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_transitioning(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// When the running fade step ends.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Overlay opacity the surface should be animating towards.
    pub fn overlay_target(&self) -> f32 {
        match self.phase {
            Phase::FadingIn => 1.0,
            Phase::Idle | Phase::FadingOut => 0.0,
        }
    }

    pub fn queued(&self) -> Option<&Destination> {
        self.queued.as_ref()
    }

    fn begin(&mut self, rotating: bool) {
        self.phase = Phase::FadingIn;
        self.rotating = rotating;
        self.deadline = Some(Instant::now() + self.fade);
    }

    /// Rotation tick: crossfade to the preloaded hidden buffer.  Ignored
    /// (returns `false`) while a transition is in flight.
    pub fn trigger(&mut self) -> bool {
        if self.is_transitioning() {
            debug!("rotation tick ignored: transition in flight");
            return false;
        }
        self.begin(true);
        true
    }

    /// Selection made elsewhere (remote, another display).  Starts a
    /// transition to it, or queues it when one is already running.
    pub fn select(&mut self, destination: Destination) -> bool {
        if self.is_transitioning() {
            debug!("queueing '{}' behind running transition", destination.id);
            self.queued = Some(destination);
            return true;
        }
        if destination.id == self.visible().id {
            return false;
        }
        self.buffers[self.visible.other().index()] = destination;
        self.begin(false);
        true
    }

    /// Ends the current fade step.  Call when [`Presenter::deadline`] passes.
    pub fn advance<R: Rng + ?Sized>(&mut self, catalog: &Catalog, rng: &mut R) -> Option<Step> {
        match self.phase {
            Phase::Idle => None,
            Phase::FadingIn => Some(self.swap(catalog, rng)),
            Phase::FadingOut => {
                self.phase = Phase::Idle;
                self.deadline = None;
                let follow_up = match self.queued.take() {
                    Some(destination) => self.select(destination),
                    None => false,
                };
                Some(Step::Finished { follow_up })
            }
        }
    }

    fn swap<R: Rng + ?Sized>(&mut self, catalog: &Catalog, rng: &mut R) -> Step {
        let mut announce = self.rotating;
        if let Some(queued) = self.queued.take() {
            announce = false;
            if queued.id == self.visible().id {
                // Manual pick landed on what is already showing: no swap.
                self.finish_covered();
                return Step::Covered {
                    current: queued.id,
                    announce,
                };
            }
            self.buffers[self.visible.other().index()] = queued;
        }

        let previous = self.visible().clone();
        self.visible = self.visible.other();
        let current = self.visible().id.clone();
        let next = catalog
            .random_other(Some(current.as_str()), rng)
            .cloned()
            .unwrap_or(previous);
        debug!("covered: showing '{}', preloading '{}'", current, next.id);
        self.buffers[self.visible.other().index()] = next;
        self.finish_covered();
        Step::Covered { current, announce }
    }

    fn finish_covered(&mut self) {
        self.phase = Phase::FadingOut;
        self.rotating = false;
        self.deadline = Some(Instant::now() + self.fade);
    }

    /// Takes fresh copies of both buffers and the queued pick from a new
    /// snapshot, and re-picks the hidden buffer when its destination left
    /// the catalog.
    pub fn on_catalog<R: Rng + ?Sized>(&mut self, catalog: &Catalog, rng: &mut R) {
        for buffer in self.buffers.iter_mut() {
            if let Some(fresh) = catalog.lookup(&buffer.id) {
                if fresh != buffer {
                    debug!("'{}' changed in the catalog, reloading", buffer.id);
                    *buffer = fresh.clone();
                }
            }
        }
        self.queued = self
            .queued
            .take()
            .and_then(|queued| catalog.lookup(&queued.id).cloned());
        if catalog.contains(&self.hidden().id) {
            return;
        }
        let visible_id = self.visible().id.clone();
        if let Some(next) = catalog.random_other(Some(visible_id.as_str()), rng).cloned() {
            debug!("hidden '{}' left the catalog, preloading '{}'", self.hidden().id, next.id);
            self.buffers[self.visible.other().index()] = next;
        }
    }
}
