//! Deterministic blink scheduling.
//!
//! Blinks follow a four-phase state machine driven by a seeded RNG so a
//! given seed always produces the same blink timeline for the same frame
//! cadence. Intervals between blinks are drawn uniformly from the
//! configured range.

use crate::config::AnimationConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlinkPhase {
    Open,
    Closing,
    Closed,
    Opening,
}

/// Seeded blink state machine, advanced once per animation frame.
pub struct BlinkScheduler {
    rng: StdRng,
    phase: BlinkPhase,
    /// Seconds remaining in the current phase.
    remaining: f32,
    min_interval: f32,
    max_interval: f32,
    closing: f32,
    closed: f32,
    opening: f32,
}

impl BlinkScheduler {
    pub fn new(config: &AnimationConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.blink_seed);
        let min_interval = config.blink_min_interval_s.max(0.0);
        let max_interval = config.blink_max_interval_s.max(min_interval);
        let first = rng.gen_range(min_interval..=max_interval);
        Self {
            rng,
            phase: BlinkPhase::Open,
            remaining: first,
            min_interval,
            max_interval,
            closing: config.blink_closing_ms as f32 / 1000.0,
            closed: config.blink_closed_ms as f32 / 1000.0,
            opening: config.blink_opening_ms as f32 / 1000.0,
        }
    }

    /// Advance by `dt` seconds and return the eye blink value in [0, 1],
    /// where 0.0 is fully open and 1.0 is fully closed.
    pub fn advance(&mut self, dt: f32) -> f32 {
        self.remaining -= dt;
        while self.remaining <= 0.0 {
            let leftover = -self.remaining;
            let (next, duration) = match self.phase {
                BlinkPhase::Open => (BlinkPhase::Closing, self.closing),
                BlinkPhase::Closing => (BlinkPhase::Closed, self.closed),
                BlinkPhase::Closed => (BlinkPhase::Opening, self.opening),
                BlinkPhase::Opening => (
                    BlinkPhase::Open,
                    self.rng.gen_range(self.min_interval..=self.max_interval),
                ),
            };
            self.phase = next;
            self.remaining = duration - leftover;
            if duration <= 0.0 {
                // Degenerate zero-length phase; hold it for one step so the
                // machine cannot spin in place.
                self.remaining = f32::MIN_POSITIVE;
            }
        }
        self.value()
    }

    fn value(&self) -> f32 {
        match self.phase {
            BlinkPhase::Open => 0.0,
            BlinkPhase::Closed => 1.0,
            // Linear ramp through the transition phases.
            BlinkPhase::Closing => 1.0 - (self.remaining / self.closing).clamp(0.0, 1.0),
            BlinkPhase::Opening => (self.remaining / self.opening).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> AnimationConfig {
        AnimationConfig {
            blink_seed: seed,
            ..Default::default()
        }
    }

    #[test]
    fn same_seed_gives_same_timeline() {
        let cfg = config(42);
        let mut a = BlinkScheduler::new(&cfg);
        let mut b = BlinkScheduler::new(&cfg);
        let dt = 1.0 / 30.0;
        for _ in 0..600 {
            assert_eq!(a.advance(dt), b.advance(dt));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = BlinkScheduler::new(&config(1));
        let mut b = BlinkScheduler::new(&config(2));
        let dt = 1.0 / 30.0;
        let diverged = (0..600).any(|_| a.advance(dt) != b.advance(dt));
        assert!(diverged);
    }

    #[test]
    fn values_stay_in_unit_range() {
        let mut s = BlinkScheduler::new(&config(7));
        let dt = 1.0 / 30.0;
        for _ in 0..1000 {
            let v = s.advance(dt);
            assert!((0.0..=1.0).contains(&v), "blink value {v} out of range");
        }
    }

    #[test]
    fn a_blink_happens_within_the_configured_window() {
        let cfg = AnimationConfig {
            blink_min_interval_s: 0.1,
            blink_max_interval_s: 0.2,
            blink_seed: 3,
            ..Default::default()
        };
        let mut s = BlinkScheduler::new(&cfg);
        let dt = 1.0 / 60.0;
        // Within one second the eyes must close at least once.
        let closed = (0..60).any(|_| s.advance(dt) > 0.5);
        assert!(closed);
    }
}
