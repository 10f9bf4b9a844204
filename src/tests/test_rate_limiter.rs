use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::runtime::block_on;
use crate::{
    AtomicStore, AttemptLimit, KeyPrefix, ManualClock, MemoryStore, Namespace, RateLimitDecision,
    RateLimiter, RateLimiterOptions, SlidelimitError, StoreHandle, Transaction,
    TransactionOutcome, WindowSize,
};

const START: Duration = Duration::from_secs(1_700_000_000);

struct Harness {
    store: Arc<MemoryStore>,
    handle: StoreHandle,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let handle = StoreHandle::from(store.clone() as Arc<dyn AtomicStore>);

        Self {
            store,
            handle,
            clock,
        }
    }

    fn limiter(&self, period_seconds: u64, limit: u64) -> RateLimiter {
        RateLimiter::try_new(
            self.handle.clone(),
            Duration::from_secs(period_seconds),
            limit,
        )
        .unwrap()
        .with_clock(self.clock.clone())
    }
}

fn ns(s: &str) -> Namespace {
    Namespace::try_from(s).unwrap()
}

#[test]
fn admits_exactly_limit_attempts_within_window() {
    let h = Harness::new();
    let limiter = h.limiter(10, 3);
    let k = ns("k");

    block_on(async {
        for _ in 0..3 {
            assert!(limiter.attempt(&k).await.unwrap());
            h.clock.advance(Duration::from_millis(10));
        }

        assert!(!limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn admits_again_once_oldest_attempt_leaves_window() {
    let h = Harness::new();
    let limiter = h.limiter(10, 3);
    let k = ns("k");

    block_on(async {
        for _ in 0..3 {
            assert!(limiter.attempt(&k).await.unwrap());
        }
        assert!(!limiter.attempt(&k).await.unwrap());

        // The window is inclusive: an attempt exactly `period` old still counts.
        h.clock.advance(Duration::from_secs(10));
        assert!(!limiter.attempt(&k).await.unwrap());

        h.clock.advance(Duration::from_millis(1));
        assert!(limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn throttles_twenty_attempts_at_half_second_intervals() {
    let h = Harness::new();
    let limiter = h.limiter(10, 10);
    let k = ns("test_namespace");

    block_on(async {
        for i in 0..20 {
            h.clock.advance(Duration::from_millis(500));
            let allowed = limiter.attempt(&k).await.unwrap();
            assert_eq!(allowed, i < 10, "attempt {}", i + 1);
        }

        h.clock.advance(Duration::from_secs(6));
        assert!(limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn peek_reports_limited_until_window_passes() {
    let h = Harness::new();
    let limiter = h.limiter(10, 10);
    let k = ns("test_namespace2");

    block_on(async {
        for _ in 0..10 {
            assert!(limiter.attempt(&k).await.unwrap());
        }
        assert!(limiter.is_rate_limited(&k).await.unwrap());

        h.clock.advance(Duration::from_secs(10) + Duration::from_millis(1));
        assert!(!limiter.is_rate_limited(&k).await.unwrap());
    });
}

#[test]
fn peeking_never_records_an_attempt() {
    let h = Harness::new();
    let limiter = h.limiter(10, 2);
    let k = ns("k");

    block_on(async {
        for _ in 0..50 {
            assert!(!limiter.is_rate_limited(&k).await.unwrap());
        }
        assert!(h.store.is_empty());

        assert!(limiter.attempt(&k).await.unwrap());
        assert!(!limiter.is_rate_limited(&k).await.unwrap());
        assert!(limiter.attempt(&k).await.unwrap());
        assert!(limiter.is_rate_limited(&k).await.unwrap());
        assert!(!limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn namespaces_are_independent() {
    let h = Harness::new();
    let limiter = h.limiter(10, 2);
    let a = ns("a");
    let b = ns("b");

    block_on(async {
        assert!(limiter.attempt(&a).await.unwrap());
        assert!(limiter.attempt(&a).await.unwrap());
        assert!(!limiter.attempt(&a).await.unwrap());
        assert!(limiter.is_rate_limited(&a).await.unwrap());

        assert!(!limiter.is_rate_limited(&b).await.unwrap());
        assert!(limiter.attempt(&b).await.unwrap());
    });
}

#[test]
fn uninitialized_store_fails_instead_of_deciding() {
    let handle = StoreHandle::uninitialized();
    let limiter = RateLimiter::try_new(handle.clone(), Duration::from_secs(10), 10).unwrap();
    let k = ns("test_namespace");

    block_on(async {
        assert!(matches!(
            limiter.attempt(&k).await,
            Err(SlidelimitError::NotInitialized)
        ));
        assert!(matches!(
            limiter.is_rate_limited(&k).await,
            Err(SlidelimitError::NotInitialized)
        ));

        // Initializing the shared handle afterwards is observed by the limiter.
        handle.init(Arc::new(MemoryStore::new())).unwrap();
        assert!(limiter.attempt(&k).await.unwrap());
    });

    assert!(matches!(
        handle.init(Arc::new(MemoryStore::new())),
        Err(SlidelimitError::InvalidConfiguration(_))
    ));
}

#[test]
fn try_new_rejects_non_positive_policy() {
    let handle = StoreHandle::new(MemoryStore::new());

    assert!(matches!(
        RateLimiter::try_new(handle.clone(), Duration::ZERO, 10),
        Err(SlidelimitError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        RateLimiter::try_new(handle, Duration::from_secs(10), 0),
        Err(SlidelimitError::InvalidConfiguration(_))
    ));
}

#[test]
fn oversized_window_is_rejected_at_construction() {
    let h = Harness::new();

    assert!(matches!(
        RateLimiter::try_new(h.handle.clone(), Duration::from_secs(u64::MAX), 1),
        Err(SlidelimitError::InvalidConfiguration(_))
    ));
}

#[test]
fn longest_window_admits_and_rejects_without_overflow() {
    let h = Harness::new();
    let limiter = RateLimiter::try_new(h.handle.clone(), WindowSize::MAX, 1)
        .unwrap()
        .with_clock(h.clock.clone());
    let k = ns("k");

    block_on(async {
        assert!(limiter.attempt(&k).await.unwrap());

        match limiter.attempt_decision(&k).await.unwrap() {
            RateLimitDecision::Rejected {
                window,
                retry_after,
                current_count,
            } => {
                assert_eq!(window, WindowSize::MAX);
                assert!(retry_after > WindowSize::MAX / 2);
                assert_eq!(current_count, 1);
            }
            RateLimitDecision::Allowed => panic!("expected rejection"),
        }
    });

    // The collection expires far beyond any clock reading.
    h.clock.advance(Duration::from_secs(100 * 365 * 24 * 3600));
    assert_eq!(h.store.cleanup(), 0);
}

#[test]
fn different_policies_do_not_share_counts() {
    let h = Harness::new();
    let strict = h.limiter(10, 1);
    let loose = h.limiter(10, 5);
    let k = ns("shared");

    block_on(async {
        assert!(strict.attempt(&k).await.unwrap());
        assert!(!strict.attempt(&k).await.unwrap());

        for _ in 0..5 {
            assert!(loose.attempt(&k).await.unwrap());
        }
        assert!(!loose.attempt(&k).await.unwrap());
    });

    assert_ne!(strict.collection_key(&k), loose.collection_key(&k));
}

#[test]
fn limiters_with_same_policy_share_counts() {
    let h = Harness::new();
    let first = h.limiter(10, 2);
    let second = h.limiter(10, 2);
    let k = ns("k");

    block_on(async {
        assert!(first.attempt(&k).await.unwrap());
        assert!(second.attempt(&k).await.unwrap());
        assert!(!first.attempt(&k).await.unwrap());
        assert!(!second.attempt(&k).await.unwrap());
    });
}

#[test]
fn attempts_at_identical_timestamps_are_counted_separately() {
    let h = Harness::new();
    let first = h.limiter(10, 6);
    let second = h.limiter(10, 6);
    let k = ns("k");

    // The clock never moves, so every attempt carries the same score.
    block_on(async {
        for _ in 0..3 {
            assert!(first.attempt(&k).await.unwrap());
            assert!(second.attempt(&k).await.unwrap());
        }

        assert!(!first.attempt(&k).await.unwrap());
        assert!(first.is_rate_limited(&k).await.unwrap());
    });
}

#[test]
fn rejection_reports_retry_after_and_count() {
    let h = Harness::new();
    let limiter = h.limiter(10, 2);
    let k = ns("k");

    block_on(async {
        assert!(limiter.attempt_decision(&k).await.unwrap().is_allowed());
        h.clock.advance(Duration::from_secs(4));
        assert!(limiter.attempt_decision(&k).await.unwrap().is_allowed());
        h.clock.advance(Duration::from_secs(1));

        assert_eq!(
            limiter.attempt_decision(&k).await.unwrap(),
            RateLimitDecision::Rejected {
                window: Duration::from_secs(10),
                retry_after: Duration::from_secs(5),
                current_count: 2,
            }
        );
    });
}

#[test]
fn rejected_attempts_are_not_recorded() {
    let h = Harness::new();
    let limiter = h.limiter(10, 2);
    let k = ns("k");

    block_on(async {
        assert!(limiter.attempt(&k).await.unwrap());
        assert!(limiter.attempt(&k).await.unwrap());

        for _ in 0..20 {
            h.clock.advance(Duration::from_millis(100));
            assert!(!limiter.attempt(&k).await.unwrap());
        }

        // Only the two admitted attempts age out; nothing else was recorded.
        h.clock.advance(Duration::from_secs(8) + Duration::from_millis(1));
        assert!(limiter.attempt(&k).await.unwrap());
        assert!(limiter.attempt(&k).await.unwrap());
        assert!(!limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn attempts_refresh_collection_expiry() {
    let h = Harness::new();
    let limiter = h.limiter(10, 5);
    let k = ns("k");

    block_on(async {
        assert!(limiter.attempt(&k).await.unwrap());
        h.clock.advance(Duration::from_secs(5));
        assert!(limiter.attempt(&k).await.unwrap());

        // Expiry now runs from the second attempt.
        h.clock.advance(Duration::from_secs(7));
        assert_eq!(h.store.cleanup(), 0);

        h.clock.advance(Duration::from_secs(3));
        assert_eq!(h.store.cleanup(), 1);
        assert!(h.store.is_empty());
    });
}

#[test]
fn concurrent_attempts_never_exceed_limit() {
    let h = Harness::new();
    let limiter = Arc::new(h.limiter(10, 10));
    let rt = tokio::runtime::Runtime::new().unwrap();

    let admitted = rt.block_on(async {
        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.attempt(&ns("hot")).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        admitted
    });

    assert_eq!(admitted, 10);
}

#[test]
fn collection_key_scopes_namespace_by_policy() {
    let h = Harness::new();

    assert_eq!(
        h.limiter(10, 5).collection_key(&ns("user")),
        "slidelimit:user:10000ms:5"
    );

    let limiter = RateLimiter::new(
        h.handle.clone(),
        RateLimiterOptions {
            window: WindowSize::try_from(Duration::from_millis(1500)).unwrap(),
            limit: AttemptLimit::try_from(3u64).unwrap(),
            prefix: Some(KeyPrefix::try_from("api".to_string()).unwrap()),
        },
    );
    assert_eq!(
        limiter.collection_key(&ns("2001:db8::1")),
        "api:2001:db8::1:1500ms:3"
    );
    assert_eq!(*limiter.limit(), 3);
    assert_eq!(*limiter.window(), Duration::from_millis(1500));
}

struct UnreachableStore;

#[async_trait]
impl AtomicStore for UnreachableStore {
    async fn run_atomically(
        &self,
        _collection: &str,
        _tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        Err(SlidelimitError::StoreUnavailable("connection refused".into()))
    }
}

#[test]
fn store_failures_propagate_unchanged() {
    let limiter = RateLimiter::try_new(
        StoreHandle::new(UnreachableStore),
        Duration::from_secs(10),
        10,
    )
    .unwrap();
    let k = ns("k");

    block_on(async {
        let err = limiter.attempt(&k).await.unwrap_err();
        assert!(err.is_store_unavailable());

        let err = limiter.is_rate_limited(&k).await.unwrap_err();
        assert!(err.is_store_unavailable());
    });
}
