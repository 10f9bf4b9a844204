//! Sliding-window admission against an [`AtomicStore`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    AttemptLimit, Clock, KeyPrefix, Namespace, RateLimitDecision, SlidelimitError, StoreHandle,
    SystemClock, Transaction, TransactionOutcome, WindowSize,
};

/// Policy for a [`RateLimiter`].
///
/// # Examples
///
/// ```
/// use slidelimit::{AttemptLimit, RateLimiterOptions, WindowSize};
///
/// let options = RateLimiterOptions {
///     window: WindowSize::try_from(60u64).unwrap(),
///     limit: AttemptLimit::try_from(100u64).unwrap(),
///     prefix: None,
/// };
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiterOptions {
    /// Trailing window attempts are counted over.
    pub window: WindowSize,

    /// Attempts admitted per window.
    pub limit: AttemptLimit,

    /// Optional prefix for every collection key.
    ///
    /// Keys are `<prefix>:<namespace>:<window_ms>ms:<limit>`. If `None`,
    /// defaults to `"slidelimit"`.
    pub prefix: Option<KeyPrefix>,
}

/// Namespace-scoped sliding-window rate limiter.
///
/// Holds no per-namespace state: every call is one atomic transaction against
/// the namespace's collection in the shared store, so any number of processes
/// sharing the store agree on every decision.
///
/// # Algorithm
///
/// [`attempt`](Self::attempt) runs, indivisibly:
///
/// 1. drop records older than `now - window`
/// 2. count the remaining records
/// 3. if `count < limit`, record `now` under a member unique to this call and
///    refresh the collection expiry to `window`
///
/// The limit is therefore never exceeded, whatever the interleaving of
/// concurrent callers.
///
/// # Policy scoping
///
/// The policy is part of the collection key, so two limiters with different
/// windows or limits never share counts, even for the same namespace. Two
/// limiters with the same policy and prefix do share them.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// use std::time::Duration;
/// use slidelimit::{MemoryStore, Namespace, RateLimiter, StoreHandle};
///
/// let store = StoreHandle::new(MemoryStore::new());
/// let limiter = RateLimiter::try_new(store, Duration::from_secs(10), 2).unwrap();
/// let ns = Namespace::try_from("user_123").unwrap();
///
/// assert!(limiter.attempt(&ns).await.unwrap());
/// assert!(limiter.attempt(&ns).await.unwrap());
/// assert!(!limiter.attempt(&ns).await.unwrap());
/// assert!(limiter.is_rate_limited(&ns).await.unwrap());
/// # });
/// ```
pub struct RateLimiter {
    store: StoreHandle,
    window: WindowSize,
    limit: AttemptLimit,
    prefix: KeyPrefix,
    clock: Arc<dyn Clock>,
    nonce: u32,
    sequence: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter from validated options.
    pub fn new(store: StoreHandle, options: RateLimiterOptions) -> Self {
        Self {
            store,
            window: options.window,
            limit: options.limit,
            prefix: options.prefix.unwrap_or_default(),
            clock: Arc::new(SystemClock),
            nonce: rand::random(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Create a limiter admitting `limit` attempts per trailing `period`.
    ///
    /// Fails with [`SlidelimitError::InvalidConfiguration`] if either is zero.
    pub fn try_new(
        store: StoreHandle,
        period: Duration,
        limit: u64,
    ) -> Result<Self, SlidelimitError> {
        Ok(Self::new(
            store,
            RateLimiterOptions {
                window: WindowSize::try_from(period)?,
                limit: AttemptLimit::try_from(limit)?,
                prefix: None,
            },
        ))
    }

    /// Replace the time source used for attempt timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured window.
    pub fn window(&self) -> WindowSize {
        self.window
    }

    /// The configured limit.
    pub fn limit(&self) -> AttemptLimit {
        self.limit
    }

    /// Record an attempt for `namespace` if it is under the limit.
    ///
    /// Returns `Ok(true)` if the attempt was admitted and recorded, `Ok(false)`
    /// if the namespace is at its limit (nothing is recorded). Errors mean the
    /// decision is unknown; they are never retried here.
    pub async fn attempt(&self, namespace: &Namespace) -> Result<bool, SlidelimitError> {
        Ok(self.attempt_decision(namespace).await?.is_allowed())
    } // end method attempt

    /// Like [`attempt`](Self::attempt), with backoff hints on rejection.
    pub async fn attempt_decision(
        &self,
        namespace: &Namespace,
    ) -> Result<RateLimitDecision, SlidelimitError> {
        let now = self.clock.now_secs_f64();
        let window = self.window.as_secs_f64();

        let tx = Transaction::new()
            .remove_score_below(now - window)
            .count_all()
            .oldest_score()
            .require_count_below(*self.limit)
            .add_scored(now, self.member(now))
            .set_expiry(*self.window);

        let outcome = self.run(namespace, &tx).await?;
        let current_count = outcome.last_count();

        if !outcome.halted() {
            tracing::debug!(%namespace, current_count, "rate_limiter.attempt.allowed");
            return Ok(RateLimitDecision::Allowed);
        }

        let retry_after = outcome
            .oldest_score()
            .and_then(|oldest| {
                Duration::try_from_secs_f64((oldest + window - now).max(0.0)).ok()
            })
            .unwrap_or_default();

        tracing::debug!(
            %namespace,
            current_count,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate_limiter.attempt.rejected"
        );

        Ok(RateLimitDecision::Rejected {
            window: *self.window,
            retry_after,
            current_count,
        })
    } // end method attempt_decision

    /// Whether `namespace` is at or over its limit, without recording anything.
    ///
    /// Expired records are excluded from the count but not deleted. Against a
    /// store configured for replica reads the answer may lag recent attempts
    /// made through other processes.
    pub async fn is_rate_limited(&self, namespace: &Namespace) -> Result<bool, SlidelimitError> {
        let now = self.clock.now_secs_f64();
        let tx = Transaction::new().count_score_at_least(now - self.window.as_secs_f64());

        let count = self.run(namespace, &tx).await?.last_count();

        Ok(count >= *self.limit)
    }

    /// The store collection holding `namespace`'s attempts under this policy.
    pub fn collection_key(&self, namespace: &Namespace) -> String {
        format!(
            "{}:{}:{}ms:{}",
            &*self.prefix,
            &**namespace,
            self.window.as_millis(),
            *self.limit
        )
    }

    async fn run(
        &self,
        namespace: &Namespace,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        let store = self.store.get()?;
        let collection = self.collection_key(namespace);

        store
            .run_atomically(&collection, tx)
            .await
            .inspect_err(|err| {
                tracing::error!(error = ?err, %collection, "rate_limiter.store.error");
            })
    }

    fn member(&self, now: f64) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        format!(
            "{}-{:08x}-{}",
            (now * 1_000_000.0) as u64,
            self.nonce,
            sequence
        )
    }
}
