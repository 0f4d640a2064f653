//! Retry policy wrapping the circuit breaker.
//!
//! Exponential backoff with jitter. Only retryable errors (transient,
//! rate-limit) are attempted again; everything else returns immediately.
//! Backoff sleeps race the context's cancellation token, and retries
//! consume the remaining deadline rather than extending it.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use super::CircuitBreaker;
use crate::context::RequestContext;
use crate::errors::{Result, VaultSyncError};

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    /// Jitter fraction applied symmetrically (0.2 = ±20%)
    pub jitter: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Hard timeout per attempt; a timed-out attempt counts toward the
    /// breaker but is not retried
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry (attempt is 1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            rand::thread_rng().gen_range(capped - spread..=capped + spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Run `call` through the breaker with retries.
///
/// Each attempt checks the context first, then asks the breaker for
/// admission. The breaker is settled with every attempt's outcome; a
/// `BreakerOpen` rejection is returned as-is (it is not retryable).
pub async fn execute<T, F, Fut>(
    ctx: &RequestContext,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 1u32;

    loop {
        ctx.check(operation)?;
        breaker.before_call()?;

        let result = match policy.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(VaultSyncError::timeout(operation, timeout)),
            },
            None => call().await,
        };
        breaker.settle(&result);

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        request_id = %ctx.request_id(),
                        operation = %operation,
                        attempt = attempt,
                        "Call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let mut delay = policy.delay_for(attempt);
                if let VaultSyncError::RateLimited { retry_after: Some(hint), .. } = &err {
                    delay = delay.max(*hint);
                }
                // Retries consume the remaining deadline; never sleep past it.
                if let Some(remaining) = ctx.remaining() {
                    if remaining <= delay {
                        warn!(
                            request_id = %ctx.request_id(),
                            operation = %operation,
                            attempt = attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            error = %err,
                            "Deadline too close to retry"
                        );
                        return Err(err);
                    }
                }
                debug!(
                    request_id = %ctx.request_id(),
                    operation = %operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel_token().cancelled() => {
                        return Err(VaultSyncError::cancelled(operation));
                    }
                }
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    warn!(
                        request_id = %ctx.request_id(),
                        operation = %operation,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "Call failed after retries"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::context::{ManualClock, SystemClock};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig::default(), Arc::new(SystemClock))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { base_delay: Duration::from_millis(1), jitter: 0.0, ..Default::default() }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy { jitter: 0.0, ..Default::default() };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = RetryPolicy { jitter: 0.0, ..Default::default() };
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for(2).as_secs_f64();
            assert!((0.16..=0.24).contains(&d), "jittered delay out of range: {}", d);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let breaker = test_breaker();
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);

        let result = execute(&ctx, &fast_policy(), &breaker, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VaultSyncError::transient("op", "flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let breaker = test_breaker();
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = execute(&ctx, &fast_policy(), &breaker, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultSyncError::transient("op", "down")) }
        })
        .await;

        assert!(matches!(result, Err(VaultSyncError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let breaker = test_breaker();
        let ctx = RequestContext::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = execute(&ctx, &fast_policy(), &breaker, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VaultSyncError::permission_denied("op", "denied")) }
        })
        .await;

        assert!(matches!(result, Err(VaultSyncError::PermissionDenied { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_without_calling() {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig { failure_threshold: 1, ..Default::default() };
        let breaker = CircuitBreaker::new("test", config, clock);
        let ctx = RequestContext::new();

        // Trip the breaker.
        breaker.before_call().unwrap();
        breaker.on_failure();

        let calls = AtomicU32::new(0);
        let result: Result<()> = execute(&ctx, &fast_policy(), &breaker, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(VaultSyncError::BreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let breaker = test_breaker();
        let ctx = RequestContext::new();
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            jitter: 0.0,
            ..Default::default()
        };

        ctx.cancel();
        let result: Result<()> = execute(&ctx, &policy, &breaker, "op", || async {
            Err(VaultSyncError::transient("op", "flaky"))
        })
        .await;

        assert!(matches!(result, Err(VaultSyncError::Cancelled { .. })));
    }
}
