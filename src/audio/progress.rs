//! Playback position tracking
//!
//! Position is `base + (now - started_at)`, capped at the track duration.
//! `base` is where the current segment began (0 for a fresh play, the target
//! after a seek). Base and start time always change together.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Anchor {
    base: f64,
    started_at: Duration,
}

/// Computes the reported position from a monotonic clock
#[derive(Debug, Default)]
pub struct ProgressTracker {
    anchor: Option<Anchor>,
    duration: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a new playback of `duration` seconds from `base`
    pub fn start(&mut self, base: f64, now: Duration, duration: f64) {
        self.duration = duration.max(0.0);
        self.restart(base, now);
    }

    /// Re-anchor at `new_base` as of `now` (after a seek)
    pub fn restart(&mut self, new_base: f64, now: Duration) {
        self.anchor = Some(Anchor {
            base: new_base.clamp(0.0, self.duration),
            started_at: now,
        });
    }

    /// Stop producing positions until the next start
    pub fn stop(&mut self) {
        self.anchor = None;
    }

    pub fn is_active(&self) -> bool {
        self.anchor.is_some()
    }

    /// Position at `now`, or `None` while stopped
    pub fn tick(&self, now: Duration) -> Option<f64> {
        let anchor = self.anchor?;
        let elapsed = now.saturating_sub(anchor.started_at).as_secs_f64();
        Some((anchor.base + elapsed).min(self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_advances_from_base() {
        let mut tracker = ProgressTracker::new();
        tracker.start(0.0, Duration::from_secs(10), 30.0);
        assert_relative_eq!(tracker.tick(Duration::from_secs(10)).unwrap(), 0.0);
        assert_relative_eq!(
            tracker.tick(Duration::from_millis(12_500)).unwrap(),
            2.5,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_restart_reanchors_base() {
        let mut tracker = ProgressTracker::new();
        tracker.start(0.0, Duration::ZERO, 30.0);
        tracker.restart(15.0, Duration::from_secs(4));
        assert_relative_eq!(tracker.tick(Duration::from_secs(4)).unwrap(), 15.0);
        assert_relative_eq!(tracker.tick(Duration::from_secs(5)).unwrap(), 16.0);
    }

    #[test]
    fn test_position_capped_at_duration() {
        let mut tracker = ProgressTracker::new();
        tracker.start(0.0, Duration::ZERO, 3.0);
        assert_eq!(tracker.tick(Duration::from_secs(60)), Some(3.0));
    }

    #[test]
    fn test_clock_behind_anchor_reads_base() {
        let mut tracker = ProgressTracker::new();
        tracker.start(2.0, Duration::from_secs(5), 10.0);
        assert_eq!(tracker.tick(Duration::from_secs(1)), Some(2.0));
    }

    #[test]
    fn test_stop_silences_ticks() {
        let mut tracker = ProgressTracker::new();
        tracker.start(0.0, Duration::ZERO, 10.0);
        tracker.stop();
        assert!(!tracker.is_active());
        assert_eq!(tracker.tick(Duration::from_secs(1)), None);
    }
}
