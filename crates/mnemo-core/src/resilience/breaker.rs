//! Sliding-window circuit breaker.
//!
//! CLOSED tracks the last N outcomes; once enough samples exist and the
//! failure share crosses the threshold it trips OPEN. After the cool-down
//! the first caller moves it to HALF_OPEN, which admits exactly
//! `half_open_probes` invocations: all passing closes the circuit, the
//! first failure reopens it. Everything runs under one mutex so probe
//! accounting stays exact under concurrent callers.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Recent outcomes, `true` meaning failure, newest at the back.
    window: VecDeque<bool>,
    opened_at_ms: i64,
    probes_admitted: u32,
    probe_successes: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at_ms: 0,
                probes_admitted: 0,
                probe_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Gate for one invocation. `false` means the caller must take the
    /// circuit-open fallback. Returns the transition it caused, if any.
    pub fn try_acquire(&self, now_ms: i64) -> (bool, Option<CircuitState>) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                if now_ms - inner.opened_at_ms >= self.config.cooldown_ms as i64 {
                    inner.state = CircuitState::HalfOpen;
                    inner.probes_admitted = 1;
                    inner.probe_successes = 0;
                    (true, Some(CircuitState::HalfOpen))
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_admitted < self.config.half_open_probes {
                    inner.probes_admitted += 1;
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Reports the outcome of an admitted invocation. Returns the
    /// transition it caused, if any.
    pub fn record(&self, success: bool, now_ms: i64) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(!success);
                while inner.window.len() > self.config.window {
                    inner.window.pop_front();
                }

                let len = inner.window.len();
                if len < self.config.min_samples {
                    return None;
                }
                let failures = inner.window.iter().filter(|f| **f).count();
                if failures as f64 / len as f64 >= self.config.failure_ratio {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = now_ms;
                    inner.window.clear();
                    return Some(CircuitState::Open);
                }
                None
            }
            CircuitState::HalfOpen => {
                if success {
                    inner.probe_successes += 1;
                    if inner.probe_successes >= self.config.half_open_probes {
                        inner.state = CircuitState::Closed;
                        inner.window.clear();
                        return Some(CircuitState::Closed);
                    }
                    None
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = now_ms;
                    inner.probes_admitted = 0;
                    inner.probe_successes = 0;
                    Some(CircuitState::Open)
                }
            }
            // results landing after the circuit re-opened carry no new
            // information
            CircuitState::Open => None,
        }
    }
}
