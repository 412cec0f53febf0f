use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{ResourceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Three-state circuit breaker guarding the download path.
///
/// CLOSED counts consecutive failures; at `threshold` it trips OPEN and
/// everything fails fast with `circuit-open`. After `recovery` elapses the
/// next `check` lets a single probe through (HALF_OPEN); its outcome either
/// closes the circuit or re-opens it with a fresh timer.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    recovery: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            threshold,
            recovery,
        }
    }

    /// Gate one execution. `Err(CircuitOpen)` means fail fast, do not call
    /// the bridge.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery {
                    info!("circuit breaker half-open, letting a probe through");
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(ResourceError::CircuitOpen)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::HalfOpen {
            info!("circuit breaker closed after successful probe");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::HalfOpen => {
                warn!("circuit breaker probe failed, re-opening");
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_failures = 0;
                }
            }
            State::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(300));
        for _ in 0..4 {
            cb.record_failure();
            assert!(cb.check().is_ok());
        }
        cb.record_failure();
        assert!(cb.is_open());
        assert!(matches!(cb.check(), Err(ResourceError::CircuitOpen)));
    }

    #[test]
    fn success_resets_the_failure_run() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(300));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.is_open());
        // Recovery elapsed (zero) — probe allowed.
        assert!(cb.check().is_ok());
        cb.record_success();
        assert!(!cb.is_open());
        assert!(cb.check().is_ok());
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.check().is_ok()); // recovery elapsed, half-open
        cb.record_failure();
        assert!(cb.is_open());
    }
}
