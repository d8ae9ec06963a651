//! Slideshow timer.
//!
//! Armed only while slideshow mode is on and the catalog has at least two
//! entries.  Disarming drops the interval, so no tick can fire afterwards.

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::info;

pub struct RotationScheduler {
    enabled: bool,
    period: Duration,
    interval: Option<Interval>,
}

impl RotationScheduler {
    pub fn new(enabled: bool, period: Duration) -> Self {
        Self {
            enabled,
            period,
            interval: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Re-evaluates arming against the catalog size.  Returns `true` when the
    /// armed state flipped.  An already armed timer keeps its phase.
    pub fn update(&mut self, catalog_len: usize) -> bool {
        let should_arm = self.enabled && catalog_len >= 2;
        match (should_arm, self.interval.is_some()) {
            (true, false) => {
                let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.interval = Some(interval);
                info!("rotation armed, every {:?}", self.period);
                true
            }
            (false, true) => {
                self.interval = None;
                info!("rotation disarmed ({} destinations)", catalog_len);
                true
            }
            _ => false,
        }
    }

    /// Completes on the next tick; pends forever while disarmed.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(60);

    async fn ticks_within(scheduler: &mut RotationScheduler, window: Duration) -> bool {
        tokio::time::timeout(window, scheduler.tick()).await.is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_ticks() {
        let mut scheduler = RotationScheduler::new(false, PERIOD);
        assert!(!scheduler.update(5));
        assert!(!ticks_within(&mut scheduler, Duration::from_secs(600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_entry_catalog_never_ticks() {
        let mut scheduler = RotationScheduler::new(true, PERIOD);
        assert!(!scheduler.update(1));
        assert!(!scheduler.is_armed());
        assert!(!ticks_within(&mut scheduler, Duration::from_secs(600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let mut scheduler = RotationScheduler::new(true, PERIOD);
        assert!(scheduler.update(3));
        let start = Instant::now();
        scheduler.tick().await;
        assert_eq!(start.elapsed(), PERIOD);
        scheduler.tick().await;
        assert_eq!(start.elapsed(), PERIOD * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_keeps_phase_while_armed() {
        let mut scheduler = RotationScheduler::new(true, PERIOD);
        scheduler.update(2);
        let start = Instant::now();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!scheduler.update(4));
        scheduler.tick().await;
        assert_eq!(start.elapsed(), PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels_pending_tick() {
        let mut scheduler = RotationScheduler::new(true, PERIOD);
        scheduler.update(3);
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(scheduler.update(1));
        assert!(!ticks_within(&mut scheduler, Duration::from_secs(600)).await);

        assert!(scheduler.update(3));
        assert!(!ticks_within(&mut scheduler, Duration::from_secs(59)).await);
        assert!(ticks_within(&mut scheduler, Duration::from_secs(2)).await);
    }
}
