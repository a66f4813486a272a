use tokio::time::Instant;

/// Local position estimate for backends that only report position on state
/// changes. Anchored on every pushed state, extrapolated while playing.
#[derive(Debug, Clone, Default)]
pub struct ProgressClock {
    anchor_ms: u64,
    anchored_at: Option<Instant>,
    duration_ms: u64,
}

impl ProgressClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resynchronize on a backend report.
    pub fn resync(&mut self, position_ms: u64, duration_ms: u64, playing: bool, now: Instant) {
        self.anchor_ms = position_ms;
        self.duration_ms = duration_ms;
        self.anchored_at = if playing { Some(now) } else { None };
    }

    /// Freeze at the current estimate.
    pub fn pause(&mut self, now: Instant) {
        self.anchor_ms = self.position_at(now);
        self.anchored_at = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.anchored_at.is_some()
    }

    pub fn position_at(&self, now: Instant) -> u64 {
        let elapsed = self
            .anchored_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64)
            .unwrap_or(0);
        let position = self.anchor_ms.saturating_add(elapsed);
        if self.duration_ms > 0 {
            position.min(self.duration_ms)
        } else {
            position
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn extrapolates_only_while_playing() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.resync(10_000, 200_000, true, t0);
        assert_eq!(clock.position_at(t0 + Duration::from_millis(2500)), 12_500);

        clock.pause(t0 + Duration::from_secs(3));
        assert!(!clock.is_running());
        assert_eq!(clock.position_at(t0 + Duration::from_secs(60)), 13_000);
    }

    #[test]
    fn clamps_to_duration() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.resync(199_000, 200_000, true, t0);
        assert_eq!(clock.position_at(t0 + Duration::from_secs(5)), 200_000);
    }

    #[test]
    fn resync_replaces_drifted_estimate() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.resync(0, 0, true, t0);
        let later = t0 + Duration::from_secs(4);
        assert_eq!(clock.position_at(later), 4_000);
        clock.resync(3_600, 0, true, later);
        assert_eq!(clock.position_at(later + Duration::from_secs(1)), 4_600);
    }
}
