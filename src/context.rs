//! Request-scoped context and clock abstraction.
//!
//! Every outbound call carries a [`RequestContext`] with a request id, an
//! optional absolute deadline, and a cancellation token. Uses
//! `tokio_util::sync::CancellationToken` for proper async cancellation;
//! child contexts inherit the deadline and are cancelled with the parent.
//!
//! The [`Clock`] trait exists so circuit breakers and TTL caches can be
//! driven by a manual clock in tests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{Result, VaultSyncError};

/// Request-scoped context passed to every outbound call.
///
/// Deadlines are absolute and inherited by children; retries consume the
/// remaining budget and never extend it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Arc<str>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a new root context with a fresh request id and no deadline
    pub fn new() -> Self {
        Self {
            request_id: Arc::from(Uuid::new_v4().to_string()),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set an absolute deadline `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Create a child context: same request id and deadline, linked token
    ///
    /// Cancelling the parent cancels every child; cancelling a child leaves
    /// the parent running.
    pub fn child(&self) -> Self {
        Self {
            request_id: Arc::clone(&self.request_id),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// The request id carried in logs and error reports
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The cancellation token for use in `tokio::select!`
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context and all children
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time remaining until the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the context is cancelled or past its deadline
    ///
    /// Called at every yield point before issuing an outbound request.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(VaultSyncError::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(VaultSyncError::timeout(
                    operation,
                    now.saturating_duration_since(deadline),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic clock, injected for testability
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Production clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic breaker and TTL tests
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: parking_lot::Mutex::new(Instant::now()) }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
