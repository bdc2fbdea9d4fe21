//! Per-upstream circuit breaker.
//!
//! The breaker opens after N consecutive failures inside the rolling
//! window, rejects calls while open, and half-opens after the cool-down to
//! probe with a single request.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use wharf_core::config::CircuitConfig;

#[derive(Debug)]
enum BreakerState {
    Closed {
        consecutive_failures: u32,
        first_failure: Option<Instant>,
    },
    Open {
        since: Instant,
    },
    HalfOpen,
}

/// Circuit breaker guarding one upstream remote.
pub struct CircuitBreaker {
    failures_to_open: u32,
    window: Duration,
    open_for: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitConfig) -> Self {
        Self {
            failures_to_open: config.failures.max(1),
            window: Duration::from_secs(config.window_secs),
            open_for: Duration::from_secs(config.open_secs),
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
                first_failure: None,
            }),
        }
    }

    /// Whether a call may proceed. Transitions Open -> HalfOpen once the
    /// cool-down has elapsed; in HalfOpen exactly one probe is let through.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock");
        match &*state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.open_for {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => false,
        }
    }

    /// Record a successful call, closing the circuit.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock");
        *state = BreakerState::Closed {
            consecutive_failures: 0,
            first_failure: None,
        };
    }

    /// Record a failed call. Returns true when this failure opened the
    /// circuit.
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().expect("breaker lock");
        match &mut *state {
            BreakerState::Closed {
                consecutive_failures,
                first_failure,
            } => {
                // Failures outside the window restart the streak.
                match first_failure {
                    Some(first) if now.duration_since(*first) <= self.window => {
                        *consecutive_failures += 1;
                    }
                    _ => {
                        *first_failure = Some(now);
                        *consecutive_failures = 1;
                    }
                }
                if *consecutive_failures >= self.failures_to_open {
                    *state = BreakerState::Open { since: now };
                    return true;
                }
                false
            }
            BreakerState::HalfOpen => {
                // Probe failed: reopen.
                *state = BreakerState::Open { since: now };
                true
            }
            BreakerState::Open { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32) -> CircuitBreaker {
        CircuitBreaker::new(&CircuitConfig {
            failures,
            window_secs: 30,
            open_secs: 60,
        })
    }

    #[test]
    fn opens_after_threshold() {
        let breaker = breaker(3);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_streak() {
        let breaker = breaker(2);
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
        assert!(breaker.allow());
    }

    #[test]
    fn half_open_allows_single_probe() {
        let zero_cooldown = CircuitBreaker::new(&CircuitConfig {
            failures: 1,
            window_secs: 30,
            open_secs: 0,
        });
        assert!(zero_cooldown.record_failure());
        // Cool-down of zero: first allow() half-opens, second is rejected.
        assert!(zero_cooldown.allow());
        assert!(!zero_cooldown.allow());
        // Failed probe reopens.
        assert!(zero_cooldown.record_failure());
    }

    #[test]
    fn half_open_success_closes() {
        let zero_cooldown = CircuitBreaker::new(&CircuitConfig {
            failures: 1,
            window_secs: 30,
            open_secs: 0,
        });
        zero_cooldown.record_failure();
        assert!(zero_cooldown.allow());
        zero_cooldown.record_success();
        assert!(zero_cooldown.allow());
        assert!(zero_cooldown.allow());
    }
}
