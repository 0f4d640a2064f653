//! Circuit breaker behavior through the target store path.

use std::sync::Arc;
use std::time::Duration;

use vaultsync::breaker::{BreakerConfig, BreakerState, CircuitBreaker, RetryPolicy};
use vaultsync::context::{Clock, ManualClock, RequestContext, SystemClock};
use vaultsync::errors::VaultSyncError;
use vaultsync::store::{ListingCache, MemorySecretStoreClient, TargetStore};

fn no_retry_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 1, jitter: 0.0, ..Default::default() }
}

fn store_with_breaker(
    client: Arc<MemorySecretStoreClient>,
    breaker: Arc<CircuitBreaker>,
) -> TargetStore {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    TargetStore::new(
        "prod",
        client,
        Arc::new(ListingCache::with_default_ttl(clock)),
        breaker,
        no_retry_policy(),
    )
}

#[tokio::test]
async fn test_breaker_trips_after_threshold_and_probes_after_reset() {
    let manual = Arc::new(ManualClock::new());
    let breaker = Arc::new(CircuitBreaker::new(
        "target_store",
        BreakerConfig { failure_threshold: 3, ..Default::default() },
        manual.clone(),
    ));
    let client = Arc::new(MemorySecretStoreClient::new());
    let store = store_with_breaker(client.clone(), breaker.clone());
    let ctx = RequestContext::new();

    // Three transient failures within the window trip the breaker.
    for _ in 0..3 {
        client.inject_failure("list", VaultSyncError::transient("target_store.list", "503"));
        assert!(store.list(&ctx).await.is_err());
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(client.list_calls(), 3);

    // The fourth call is rejected without contacting the client.
    let err = store.list(&ctx).await.unwrap_err();
    assert!(matches!(err, VaultSyncError::BreakerOpen { .. }));
    assert_eq!(client.list_calls(), 3);

    // After the reset timeout exactly one probe goes through.
    manual.advance(Duration::from_secs(30));
    let records = store.list(&ctx).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(client.list_calls(), 4);
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_failed_probe_reopens_breaker() {
    let manual = Arc::new(ManualClock::new());
    let breaker = Arc::new(CircuitBreaker::new(
        "target_store",
        BreakerConfig { failure_threshold: 1, ..Default::default() },
        manual.clone(),
    ));
    let client = Arc::new(MemorySecretStoreClient::new());
    let store = store_with_breaker(client.clone(), breaker.clone());
    let ctx = RequestContext::new();

    client.inject_failure("list", VaultSyncError::transient("target_store.list", "503"));
    assert!(store.list(&ctx).await.is_err());
    assert_eq!(breaker.state(), BreakerState::Open);

    manual.advance(Duration::from_secs(30));
    client.inject_failure("list", VaultSyncError::transient("target_store.list", "503"));
    assert!(store.list(&ctx).await.is_err());
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(client.list_calls(), 2);
}

#[tokio::test]
async fn test_non_health_errors_do_not_trip_breaker() {
    let breaker = Arc::new(CircuitBreaker::new(
        "target_store",
        BreakerConfig { failure_threshold: 1, ..Default::default() },
        Arc::new(ManualClock::new()),
    ));
    let client = Arc::new(MemorySecretStoreClient::new());
    let store = store_with_breaker(client.clone(), breaker.clone());
    let ctx = RequestContext::new();

    // NotFound means the service answered; the breaker stays closed.
    assert!(store.get(&ctx, "missing/path").await.is_err());
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_transient_failures_retry_before_surfacing() {
    let breaker = Arc::new(CircuitBreaker::new(
        "target_store",
        BreakerConfig::default(),
        Arc::new(SystemClock),
    ));
    let client = Arc::new(MemorySecretStoreClient::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = TargetStore::new(
        "prod",
        client.clone(),
        Arc::new(ListingCache::with_default_ttl(clock)),
        breaker,
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            jitter: 0.0,
            ..Default::default()
        },
    );
    let ctx = RequestContext::new();

    // Two transient failures, then success: the caller sees only success.
    client.inject_failure("list", VaultSyncError::transient("target_store.list", "flaky"));
    client.inject_failure("list", VaultSyncError::transient("target_store.list", "flaky"));

    assert!(store.list(&ctx).await.is_ok());
    assert_eq!(client.list_calls(), 3);
}
