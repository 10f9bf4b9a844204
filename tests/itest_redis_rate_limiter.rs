#![cfg(any(feature = "redis-tokio", feature = "redis-smol"))]

use std::{env, sync::Arc, time::Duration};

use slidelimit::redis::RedisStore;
use slidelimit::{Namespace, RateLimitDecision, RateLimiter, SlidelimitError, StoreHandle};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_namespace(name: &str) -> Namespace {
    let n: u64 = rand::random();
    Namespace::try_from(format!("itest_{n}_{name}")).unwrap()
}

async fn store(url: &str) -> StoreHandle {
    let client = redis::Client::open(url).unwrap();
    let connection_manager = client.get_connection_manager().await.unwrap();

    StoreHandle::new(RedisStore::from_connection_manager(connection_manager))
}

#[test]
fn throttles_then_recovers_in_real_time() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        // Same shape as 20 attempts at 0.5s against (10s, 10), scaled by 1/5.
        let limiter =
            RateLimiter::try_new(store(&url).await, Duration::from_secs(2), 10).unwrap();
        let k = unique_namespace("throttle");

        for i in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let allowed = limiter.attempt(&k).await.unwrap();
            assert_eq!(allowed, i < 10, "attempt {}", i + 1);
        }

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(limiter.attempt(&k).await.unwrap());
    });
}

#[test]
fn peek_clears_after_window() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let limiter =
            RateLimiter::try_new(store(&url).await, Duration::from_secs(1), 10).unwrap();
        let k = unique_namespace("peek");

        for _ in 0..10 {
            assert!(limiter.attempt(&k).await.unwrap());
        }
        assert!(limiter.is_rate_limited(&k).await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!limiter.is_rate_limited(&k).await.unwrap());
    });
}

#[test]
fn rejection_carries_retry_hint() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let limiter =
            RateLimiter::try_new(store(&url).await, Duration::from_secs(5), 1).unwrap();
        let k = unique_namespace("retry");

        assert!(limiter.attempt(&k).await.unwrap());

        match limiter.attempt_decision(&k).await.unwrap() {
            RateLimitDecision::Rejected {
                window,
                retry_after,
                current_count,
            } => {
                assert_eq!(window, Duration::from_secs(5));
                assert!(retry_after <= Duration::from_secs(5));
                assert!(retry_after > Duration::from_secs(4));
                assert_eq!(current_count, 1);
            }
            RateLimitDecision::Allowed => panic!("expected rejection"),
        }
    });
}

#[test]
fn concurrent_limiters_share_one_limit() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let k = unique_namespace("concurrent");

        // Separate connections and limiter instances, as separate processes would have.
        let mut limiters = Vec::new();
        for _ in 0..4 {
            let limiter =
                RateLimiter::try_new(store(&url).await, Duration::from_secs(30), 25).unwrap();
            limiters.push(Arc::new(limiter));
        }

        let mut tasks = Vec::new();
        for i in 0..200 {
            let limiter = limiters[i % limiters.len()].clone();
            let k = k.clone();
            tasks.push(tokio::spawn(async move { limiter.attempt(&k).await.unwrap() }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 25);
    });
}

#[test]
fn uninitialized_handle_is_reported() {
    let limiter =
        RateLimiter::try_new(StoreHandle::uninitialized(), Duration::from_secs(10), 10).unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = rt.block_on(limiter.attempt(&unique_namespace("uninit")));

    assert!(matches!(result, Err(SlidelimitError::NotInitialized)));
}
