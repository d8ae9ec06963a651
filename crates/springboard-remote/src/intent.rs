//! Pick confirmation tracking.
//!
//! A pick is applied optimistically, then waits for the server to announce
//! the screen's selection.  Any announcement settles it (last write wins, so
//! another remote's later pick simply replaces ours).  No announcement within
//! [`CONFIRM_TIMEOUT`] leaves it flagged as unconfirmed until the next one.

use std::time::Duration;
use tokio::time::Instant;

pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Blink period of the waiting marker.
const PULSE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq)]
pub enum Intent<T> {
    Settled(T),
    Waiting { wanted: T, since: Instant },
    Unconfirmed { wanted: T },
}

/// How to draw the marker next to a picked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Plain,
    PulseOn,
    PulseOff,
    Stale,
}

impl<T: Clone + PartialEq> Intent<T> {
    pub fn new(value: T) -> Self {
        Self::Settled(value)
    }

    /// Value the operator last asked for, or the settled one.
    pub fn wanted(&self) -> &T {
        match self {
            Self::Settled(v) => v,
            Self::Waiting { wanted, .. } | Self::Unconfirmed { wanted } => wanted,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }

    pub fn want(&mut self, value: T, now: Instant) {
        *self = Self::Waiting {
            wanted: value,
            since: now,
        };
    }

    /// Server announced `value`.  Returns `true` if it matched what we wanted.
    pub fn echo(&mut self, value: T) -> bool {
        let matched = *self.wanted() == value;
        *self = Self::Settled(value);
        matched
    }

    /// Returns `true` when the wait just ran out.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self {
            Self::Waiting { wanted, since } if now.duration_since(*since) >= CONFIRM_TIMEOUT => {
                *self = Self::Unconfirmed {
                    wanted: wanted.clone(),
                };
                true
            }
            _ => false,
        }
    }

    pub fn hint(&self, now: Instant) -> Hint {
        match self {
            Self::Settled(_) => Hint::Plain,
            Self::Waiting { since, .. } => {
                let phase = now.duration_since(*since).as_millis() / PULSE.as_millis();
                if phase % 2 == 0 {
                    Hint::PulseOn
                } else {
                    Hint::PulseOff
                }
            }
            Self::Unconfirmed { .. } => Hint::Stale,
        }
    }
}
