//! Sliding-window, failure-rate circuit breaker (§4.F, §8 property 5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Size of the sliding window of recorded outcomes.
    pub window_size: usize,
    /// Failure rate (0.0..=1.0) at or above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Minimum calls in the window before the failure rate is evaluated.
    pub minimum_calls: usize,
    pub wait_duration: Duration,
    pub permitted_calls_in_half_open: usize,
    /// Calls at or above this duration count toward the slow-call rate.
    pub slow_call_threshold: Duration,
    pub slow_call_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            wait_duration: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
            slow_call_threshold: Duration::from_secs(5),
            slow_call_rate_threshold: 1.0,
        }
    }
}

struct Outcome {
    failed: bool,
    slow: bool,
}

/// One circuit breaker for one (serviceName, tenantId) pair.
pub struct CircuitBreaker {
    service: String,
    state: RwLock<CircuitState>,
    config: CircuitBreakerConfig,
    window: RwLock<VecDeque<Outcome>>,
    half_open_permits_issued: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            state: RwLock::new(CircuitState::Closed),
            config,
            window: RwLock::new(VecDeque::new()),
            half_open_permits_issued: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.check_timeout();
        *self.state.read().unwrap()
    }

    /// Whether a new call may be admitted. Does not itself record anything.
    pub fn allow_request(&self) -> bool {
        self.check_timeout();
        match *self.state.read().unwrap() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let issued = self.half_open_permits_issued.fetch_add(1, Ordering::SeqCst);
                issued < self.config.permitted_calls_in_half_open as u32
            }
        }
    }

    /// Records the outcome of a call admitted by `allow_request`.
    pub fn record_result(&self, failed: bool, elapsed: Duration) {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::HalfOpen => {
                if failed {
                    warn!(service = %self.service, "circuit breaker re-opening after half-open failure");
                    self.transition_to(CircuitState::Open);
                } else {
                    let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                    if successes as usize >= self.config.permitted_calls_in_half_open {
                        info!(service = %self.service, "circuit breaker closing after successful recovery");
                        self.transition_to(CircuitState::Closed);
                    }
                }
            }
            CircuitState::Closed => {
                let slow = elapsed >= self.config.slow_call_threshold;
                {
                    let mut window = self.window.write().unwrap();
                    window.push_back(Outcome { failed, slow });
                    while window.len() > self.config.window_size {
                        window.pop_front();
                    }
                }
                self.evaluate_window();
            }
            CircuitState::Open => {
                debug!(service = %self.service, "result recorded while circuit open, ignored");
            }
        }
    }

    fn evaluate_window(&self) {
        let window = self.window.read().unwrap();
        let total = window.len();
        if total < self.config.minimum_calls {
            return;
        }
        let failures = window.iter().filter(|o| o.failed).count();
        let slow = window.iter().filter(|o| o.slow).count();
        let failure_rate = failures as f64 / total as f64;
        let slow_rate = slow as f64 / total as f64;
        drop(window);

        if failure_rate >= self.config.failure_rate_threshold || slow_rate >= self.config.slow_call_rate_threshold {
            warn!(service = %self.service, failure_rate, slow_rate, "circuit breaker opening due to failure rate");
            self.transition_to(CircuitState::Open);
        }
    }

    fn check_timeout(&self) {
        if *self.state.read().unwrap() != CircuitState::Open {
            return;
        }
        let should_probe = self
            .opened_at
            .read()
            .unwrap()
            .map(|opened| opened.elapsed() >= self.config.wait_duration)
            .unwrap_or(false);
        if should_probe {
            info!(service = %self.service, "circuit breaker transitioning to half-open after wait duration");
            self.transition_to(CircuitState::HalfOpen);
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        *self.state.write().unwrap() = new_state;
        match new_state {
            CircuitState::Closed => {
                self.window.write().unwrap().clear();
                self.half_open_permits_issued.store(0, Ordering::SeqCst);
                self.half_open_successes.store(0, Ordering::SeqCst);
                *self.opened_at.write().unwrap() = None;
            }
            CircuitState::Open => {
                self.half_open_permits_issued.store(0, Ordering::SeqCst);
                self.half_open_successes.store(0, Ordering::SeqCst);
                *self.opened_at.write().unwrap() = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.half_open_permits_issued.store(0, Ordering::SeqCst);
                self.half_open_successes.store(0, Ordering::SeqCst);
            }
        }
    }
}
