//! Per-adapter circuit breaker.
//!
//! ```text
//!            failure × threshold              cooldown elapsed
//!  Closed ───────────────────────▶ Open ───────────────────────▶ HalfOpen
//!    ▲                              ▲                               │
//!    │          trial succeeded     │        trial failed           │
//!    └──────────────────────────────┼───────────────────────────────┘
//!                                   └───────────────────────────────┘
//! ```
//!
//! Time is passed in explicitly so transitions can be tested without
//! sleeping; callers use [`tokio::time::Instant`], which follows the paused
//! test clock.

use std::time::Duration;

use os4ai_types::{CircuitSettings, CircuitState};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    /// One trial probe has been admitted and has not reported back yet.
    HalfOpen,
}

/// Whether a poll may reach the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial.
    Trial,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    phase: Phase,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(settings: &CircuitSettings) -> Self {
        Self {
            phase: Phase::Closed { failures: 0 },
            threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown(),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures while closed; the threshold once open.
    pub fn failures(&self) -> u32 {
        match self.phase {
            Phase::Closed { failures } => failures,
            _ => self.threshold,
        }
    }

    /// Decide whether a poll at `now` may probe the hardware.  An open
    /// circuit whose cooldown has elapsed moves to half-open and admits
    /// exactly one trial.
    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.phase {
            Phase::Closed { .. } => Admission::Allowed,
            Phase::Open { opened_at } if now.duration_since(opened_at) >= self.cooldown => {
                self.phase = Phase::HalfOpen;
                Admission::Trial
            }
            Phase::Open { .. } | Phase::HalfOpen => Admission::Rejected,
        }
    }

    pub fn record_success(&mut self) {
        self.phase = Phase::Closed { failures: 0 };
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.phase = match self.phase {
            Phase::Closed { failures } if failures + 1 >= self.threshold => {
                Phase::Open { opened_at: now }
            }
            Phase::Closed { failures } => Phase::Closed {
                failures: failures + 1,
            },
            Phase::HalfOpen | Phase::Open { .. } => Phase::Open { opened_at: now },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&CircuitSettings {
            failure_threshold: 3,
            cooldown_ms: 10_000,
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let mut cb = breaker();
        let t0 = Instant::now();
        cb.record_failure(t0);
        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 2);
        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.admit(t0 + Duration::from_secs(1)), Admission::Rejected);
    }

    #[test]
    fn success_resets_the_count() {
        let mut cb = breaker();
        let t0 = Instant::now();
        cb.record_failure(t0);
        cb.record_failure(t0);
        cb.record_success();
        cb.record_failure(t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 1);
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        let later = t0 + Duration::from_secs(10);
        assert_eq!(cb.admit(later), Admission::Trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.admit(later), Admission::Rejected);
    }

    #[test]
    fn trial_success_closes() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        cb.admit(t0 + Duration::from_secs(11));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.admit(t0 + Duration::from_secs(11)), Admission::Allowed);
    }

    #[test]
    fn trial_failure_reopens_with_fresh_cooldown() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        let trial_at = t0 + Duration::from_secs(10);
        cb.admit(trial_at);
        cb.record_failure(trial_at);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.admit(trial_at + Duration::from_secs(5)), Admission::Rejected);
        assert_eq!(cb.admit(trial_at + Duration::from_secs(10)), Admission::Trial);
    }
}
