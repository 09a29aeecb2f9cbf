//! Connection circuit breaker.
//!
//! Closed -> Open after `threshold` consecutive connection failures;
//! Open -> HalfOpen once the cooldown elapses; the probe call decides
//! whether the circuit closes again or reopens.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct Breaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl Breaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Gate a call. Open circuits reject until the cooldown elapses, at
    /// which point one probe call is let through (HalfOpen).
    pub fn guard(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let since = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if since >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    let retry_in = self.cooldown.saturating_sub(since);
                    Err(BrokerError::CircuitOpen {
                        retry_in_secs: retry_in.as_secs().max(1),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "broker circuit opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("broker circuit reopened after failed probe");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }
}
