//! Engine clock — the single source of "now" for TTL and billing math.
//!
//! Injected at engine construction so tests advance time explicitly instead
//! of sleeping against the wall clock.

use crate::types::Millis;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct EngineClock {
    // None: read the wall clock. Some: fixed time, advanced manually.
    fixed: Option<AtomicI64>,
}

impl EngineClock {
    /// Wall-clock mode for production use.
    pub fn wall() -> Self {
        Self { fixed: None }
    }

    /// Deterministic mode starting at `start_ms` (used in tests).
    pub fn fixed(start_ms: Millis) -> Self {
        Self {
            fixed: Some(AtomicI64::new(start_ms)),
        }
    }

    pub fn now_ms(&self) -> Millis {
        match &self.fixed {
            Some(t) => t.load(Ordering::SeqCst),
            None => chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Advance a fixed clock. Panics on a wall clock — callers must not mix
    /// the two modes.
    pub fn advance(&self, delta_ms: Millis) {
        let t = self
            .fixed
            .as_ref()
            .expect("advance() called on wall clock");
        t.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, delta_secs: i64) {
        self.advance(delta_secs * 1_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = EngineClock::fixed(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.advance_secs(2);
        assert_eq!(clock.now_ms(), 3_500);
    }

    #[test]
    fn wall_clock_is_monotonic_enough() {
        let clock = EngineClock::wall();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
