//! 🧯 Duplicate circuit breaker — counts "duplicate key" rejections until enough is enough.
//!
//! ```text
//!   threshold = 0 ──► Disabled   (counts, never trips)
//!   threshold > 0 ──► Armed ──(count ≥ threshold)──► Tripped   (terminal)
//! ```
//!
//! The counter is cumulative for the whole run. No resets, no per-batch amnesty, no parole.

use tracing::{debug, warn};

/// 🛑 The fixed reason handed to the host when the breaker trips.
pub const DUPLICATE_STOP_REASON: &str = "duplicate key insertion threshold exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Disabled,
    Armed,
    Tripped,
}

/// 📣 What a single observation means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 🙂 Keep going.
    Continue,
    /// 🛑 This very rejection tripped the breaker. Reported exactly once per run.
    Trip,
}

#[derive(Debug)]
pub struct DuplicateBreaker {
    threshold: u64,
    count: u64,
    state: BreakerState,
}

impl DuplicateBreaker {
    pub fn new(threshold: u64) -> Self {
        let state = if threshold == 0 {
            BreakerState::Disabled
        } else {
            BreakerState::Armed
        };
        Self {
            threshold,
            count: 0,
            state,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 🔁 Record one duplicate-key rejection.
    pub fn observe(&mut self) -> Verdict {
        self.count += 1;
        debug!("🔁 Duplicate key found ({} so far)", self.count);
        match self.state {
            BreakerState::Armed if self.count >= self.threshold => {
                self.state = BreakerState::Tripped;
                warn!(
                    "🧯 {} duplicate key rejections reached the threshold of {}, tripping",
                    self.count, self.threshold
                );
                Verdict::Trip
            }
            _ => Verdict::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_kth_duplicate_and_only_the_kth_trips() {
        let mut breaker = DuplicateBreaker::new(3);
        assert_eq!(breaker.state(), BreakerState::Armed);

        assert_eq!(breaker.observe(), Verdict::Continue);
        assert_eq!(breaker.observe(), Verdict::Continue);
        assert_eq!(breaker.observe(), Verdict::Trip);
        assert_eq!(breaker.state(), BreakerState::Tripped);

        // -- 🪦 tripped is terminal: more duplicates are counted, never re-reported
        assert_eq!(breaker.observe(), Verdict::Continue);
        assert_eq!(breaker.count(), 4);
    }

    #[test]
    fn the_one_where_zero_means_count_but_never_stop() {
        let mut breaker = DuplicateBreaker::new(0);
        for _ in 0..1_000 {
            assert_eq!(breaker.observe(), Verdict::Continue);
        }
        assert_eq!(breaker.state(), BreakerState::Disabled);
        assert_eq!(breaker.count(), 1_000);
    }

    #[test]
    fn the_one_where_a_threshold_of_one_has_no_patience() {
        let mut breaker = DuplicateBreaker::new(1);
        assert_eq!(breaker.observe(), Verdict::Trip);
    }
}
