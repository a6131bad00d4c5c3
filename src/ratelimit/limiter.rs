//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace};

use super::policy::Policy;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::{Lease, Store};

/// Sliding-window rate limiter over a [`Store`].
///
/// Each call to [`attempt`](Self::attempt) holds the key in the store for the
/// duration of one window update, so concurrent attempts on the same key are
/// linearized while distinct keys proceed independently.
pub struct RateLimiter<S: Store + ?Sized> {
    policy: Policy,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store + ?Sized> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<S: Store + ?Sized> RateLimiter<S> {
    /// Create a rate limiter admitting `limit` events per `window_secs`,
    /// counted in `bucket_count` buckets.
    pub fn new(window_secs: u64, bucket_count: u64, limit: u64, store: Arc<S>) -> Result<Self> {
        let policy = Policy::new(window_secs, bucket_count, limit)?;
        Ok(Self::with_clock(policy, store, Arc::new(SystemClock)))
    }

    /// Create a rate limiter from a validated policy and an explicit clock.
    pub fn with_clock(policy: Policy, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    /// Record one event for `key`.
    ///
    /// Returns `Ok(true)` if the event is within the limit. Store failures are
    /// returned as-is and never retried.
    pub async fn attempt(&self, key: &str) -> Result<bool> {
        let Lease {
            mut window,
            ttl_secs,
        } = self.store.acquire(key).await?;

        let now = self.clock.now_secs();
        let outcome = window.increment(now, &self.policy);

        trace!(
            key = %key,
            admitted = outcome.admitted,
            mutated = outcome.mutated,
            "Rate limit decision"
        );

        if !outcome.mutated {
            self.store.release(key, None, 0).await?;
            return Ok(false);
        }

        if outcome.admitted {
            self.store
                .release(key, Some(window), self.policy.window_secs())
                .await?;
        } else {
            debug!(
                key = %key,
                suppressed_until = window.suppressed_until,
                "Rate limit exceeded"
            );
            // A denial keeps whatever lifetime the key already had
            self.store.release(key, Some(window), ttl_secs).await?;
        }

        Ok(outcome.admitted)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{Error, StoreError};
    use crate::ratelimit::Window;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const T0: i64 = 1_700_000_000;

    fn setup(
        window_secs: u64,
        bucket_count: u64,
        limit: u64,
        ttl_secs: u64,
    ) -> (RateLimiter<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::from_secs(T0));
        let store = Arc::new(MemoryStore::with_clock(
            ttl_secs,
            clock.clone(),
            Duration::from_secs(3600),
            std::future::pending::<()>(),
        ));
        let policy = Policy::new(window_secs, bucket_count, limit).unwrap();
        (RateLimiter::with_clock(policy, store, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_immediate_burst_up_to_limit() {
        let (limiter, _clock) = setup(3, 3, 10, 3);

        for i in 0..10 {
            let admitted = assert_ok!(limiter.attempt("test").await);
            assert!(admitted, "attempt {} should be admitted", i);
        }

        assert!(!assert_ok!(limiter.attempt("test").await));
    }

    #[tokio::test]
    async fn test_steady_rate_keeps_being_admitted() {
        let (limiter, clock) = setup(3, 3, 3, 3);

        for i in 0..10 {
            clock.advance_secs(1);
            let admitted = assert_ok!(limiter.attempt("test").await);
            assert!(admitted, "attempt {} should be admitted", i);
        }

        assert!(!assert_ok!(limiter.attempt("test").await));
    }

    #[tokio::test]
    async fn test_idle_key_past_ttl_gets_full_budget() {
        let (limiter, clock) = setup(3, 3, 3, 3);

        for _ in 0..3 {
            assert!(assert_ok!(limiter.attempt("test").await));
        }
        assert!(!assert_ok!(limiter.attempt("test").await));

        clock.advance_secs(4);
        for _ in 0..3 {
            assert!(assert_ok!(limiter.attempt("test").await));
        }
        assert!(!assert_ok!(limiter.attempt("test").await));
    }

    #[tokio::test]
    async fn test_denied_until_oldest_bucket_ages_out() {
        let (limiter, clock) = setup(3, 3, 2, 3);

        assert!(assert_ok!(limiter.attempt("k").await));
        clock.advance_secs(1);
        assert!(assert_ok!(limiter.attempt("k").await));

        // Oldest bucket (T0) leaves the window at T0 + 3
        assert!(!assert_ok!(limiter.attempt("k").await));
        clock.advance_secs(1);
        assert!(!assert_ok!(limiter.attempt("k").await));
        clock.advance_secs(1);
        assert!(assert_ok!(limiter.attempt("k").await));
    }

    #[tokio::test]
    async fn test_suppressed_attempts_leave_state_untouched() {
        let (limiter, _clock) = setup(3, 3, 1, 3);
        let store = limiter.store().clone();

        assert!(assert_ok!(limiter.attempt("k").await));
        assert!(!assert_ok!(limiter.attempt("k").await));

        let before = assert_ok!(store.acquire("k").await);
        assert_ok!(store.release("k", None, 0).await);
        assert!(before.window.suppressed_until > 0);

        for _ in 0..5 {
            assert!(!assert_ok!(limiter.attempt("k").await));
        }

        let after = assert_ok!(store.acquire("k").await);
        assert_ok!(store.release("k", None, 0).await);
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_denial_does_not_extend_lifetime() {
        let (limiter, clock) = setup(10, 5, 1, 3);
        let store = limiter.store().clone();

        // Admission stores the key for a full window
        assert!(assert_ok!(limiter.attempt("k").await));
        clock.advance_secs(9);
        assert!(!assert_ok!(limiter.attempt("k").await));

        let lease = assert_ok!(store.acquire("k").await);
        assert_eq!(lease.ttl_secs, 1);
        assert_ok!(store.release("k", None, 0).await);

        clock.advance_secs(2);
        assert!(assert_ok!(limiter.attempt("k").await));
    }

    #[tokio::test]
    async fn test_keys_have_independent_budgets() {
        let (limiter, _clock) = setup(60, 6, 2, 60);

        for key in ["a", "b", "c"] {
            assert!(assert_ok!(limiter.attempt(key).await));
            assert!(assert_ok!(limiter.attempt(key).await));
            assert!(!assert_ok!(limiter.attempt(key).await));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_attempts_never_exceed_limit() {
        let (limiter, _clock) = setup(60, 6, 25, 60);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                let key = if i % 2 == 0 { "shared" } else { "other" };
                tokio::spawn(async move { (key, limiter.attempt(key).await.unwrap()) })
            })
            .collect();

        let mut shared = 0;
        let mut other = 0;
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                ("shared", true) => shared += 1,
                (_, true) => other += 1,
                _ => {}
            }
        }

        assert_eq!(shared, 25);
        assert_eq!(other, 25);
    }

    #[tokio::test]
    async fn test_held_key_does_not_block_other_keys() {
        let (limiter, _clock) = setup(3, 3, 10, 3);
        let store = limiter.store().clone();

        assert_ok!(store.acquire("busy").await);

        let admitted = tokio::time::timeout(Duration::from_secs(1), limiter.attempt("free")).await;
        assert!(assert_ok!(assert_ok!(admitted)));

        assert_ok!(store.release("busy", None, 0).await);
    }

    /// Store whose backend is unreachable.
    #[derive(Default)]
    struct UnreachableStore {
        releases: AtomicUsize,
    }

    #[async_trait]
    impl Store for UnreachableStore {
        async fn acquire(&self, _key: &str) -> std::result::Result<Lease, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn release(
            &self,
            _key: &str,
            _window: Option<Window>,
            _ttl_secs: u64,
        ) -> std::result::Result<(), StoreError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_acquire_failure_is_surfaced_without_release() {
        let store = Arc::new(UnreachableStore::default());
        let limiter = RateLimiter::new(3, 3, 10, store.clone()).unwrap();

        let err = assert_err!(limiter.attempt("k").await);
        assert!(matches!(err, Error::Store(StoreError::Backend(_))));
        assert_eq!(err.to_string(), "Store backend error: connection refused");
        assert_eq!(store.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_works_behind_trait_object() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(3, std::future::pending::<()>()));
        let limiter = RateLimiter::new(3, 3, 1, store).unwrap();

        assert!(assert_ok!(limiter.attempt("k").await));
        assert!(!assert_ok!(limiter.attempt("k").await));
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let store = Arc::new(UnreachableStore::default());
        let err = assert_err!(RateLimiter::new(3, 0, 10, store));
        assert!(matches!(err, Error::Config(_)));
    }
}
