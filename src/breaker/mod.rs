//! Per-service circuit breakers.
//!
//! One breaker guards each logical service (`source`, `target_store`,
//! `blob_store`, `discovery`). The state machine:
//!
//! - **Closed**: calls pass through; failures within the rolling window are
//!   counted. Reaching `failure_threshold` opens the breaker.
//! - **Open**: calls fail immediately with `BreakerOpen`. After
//!   `reset_timeout` the next call transitions to half-open.
//! - **HalfOpen**: up to `max_probes` concurrent probe calls are admitted;
//!   the rest are rejected. The first probe success closes the breaker,
//!   a probe failure re-opens it.
//!
//! Time comes from the injected [`Clock`] so tests can drive transitions
//! deterministically. State transitions emit a structured log line and a
//! metrics counter.

pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::context::Clock;
use crate::errors::{Result, VaultSyncError};

pub use retry::RetryPolicy;

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within `window` before the breaker opens
    pub failure_threshold: u32,
    /// Rolling failure-counting window
    pub window: Duration,
    /// Time the breaker stays open before admitting probes
    pub reset_timeout: Duration,
    /// Concurrent probe calls admitted while half-open
    pub max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            max_probes: 1,
        }
    }
}

/// Breaker state, exposed for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
    probes_in_flight: u32,
}

/// Circuit breaker for one logical service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            service: service.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                window_start: now,
                opened_at: now,
                probes_in_flight: 0,
            }),
        }
    }

    /// The service this breaker guards
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state (transitions lazily on the next call)
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Gate a call: `Ok` admits it, `Err(BreakerOpen)` rejects it without
    /// contacting the service
    ///
    /// Every admitted call must be settled with [`on_success`] or
    /// [`on_failure`] so half-open probe accounting stays balanced.
    ///
    /// [`on_success`]: CircuitBreaker::on_success
    /// [`on_failure`]: CircuitBreaker::on_failure
    pub fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let now = self.clock.now();
                if now.saturating_duration_since(inner.opened_at) >= self.config.reset_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probes_in_flight = 1;
                    Ok(())
                } else {
                    crate::observability::metrics::record_breaker_rejection(&self.service);
                    Err(VaultSyncError::breaker_open(&self.service))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight < self.config.max_probes {
                    inner.probes_in_flight += 1;
                    Ok(())
                } else {
                    crate::observability::metrics::record_breaker_rejection(&self.service);
                    Err(VaultSyncError::breaker_open(&self.service))
                }
            }
        }
    }

    /// Settle an admitted call that succeeded (or failed for a reason that
    /// does not indicate service ill health)
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                self.transition(&mut inner, BreakerState::Closed);
                inner.failures = 0;
                inner.probes_in_flight = 0;
            }
            BreakerState::Closed | BreakerState::Open => {}
        }
    }

    /// Settle an admitted call that failed for a service-health reason
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        match inner.state {
            BreakerState::Closed => {
                if now.saturating_duration_since(inner.window_start) > self.config.window {
                    inner.window_start = now;
                    inner.failures = 0;
                }
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = now;
                }
            }
            BreakerState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = now;
                inner.probes_in_flight = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Settle an admitted call from its result, using the error taxonomy to
    /// decide whether it counts toward the failure window
    pub fn settle<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.on_success(),
            Err(err) if err.counts_toward_breaker() => self.on_failure(),
            Err(_) => self.on_success(),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        warn!(
            service = %self.service,
            from = %from,
            to = %to,
            failures = inner.failures,
            "Circuit breaker state transition"
        );
        crate::observability::metrics::record_breaker_transition(&self.service, &to.to_string());
    }
}

/// The four breakers guarding the pipeline's collaborators
#[derive(Debug, Clone)]
pub struct Breakers {
    pub source: Arc<CircuitBreaker>,
    pub target_store: Arc<CircuitBreaker>,
    pub blob_store: Arc<CircuitBreaker>,
    pub discovery: Arc<CircuitBreaker>,
}

impl Breakers {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            source: Arc::new(CircuitBreaker::new("source", config.clone(), clock.clone())),
            target_store: Arc::new(CircuitBreaker::new(
                "target_store",
                config.clone(),
                clock.clone(),
            )),
            blob_store: Arc::new(CircuitBreaker::new("blob_store", config.clone(), clock.clone())),
            discovery: Arc::new(CircuitBreaker::new("discovery", config, clock)),
        }
    }
}
