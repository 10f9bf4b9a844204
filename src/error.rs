/// Error type for this crate.
///
/// A denied attempt is never an error: it is `Ok(false)` from
/// [`RateLimiter::attempt`](crate::RateLimiter::attempt). Any `Err` means the
/// decision is unknown.
#[derive(Debug, thiserror::Error)]
pub enum SlidelimitError {
    /// Invalid policy, prefix or store configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Namespace rejected by validation.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// The limiter was used through a [`StoreHandle`](crate::StoreHandle) that
    /// was never initialized.
    #[error("store not initialized")]
    NotInitialized,

    /// The backing store could not execute the transaction.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SlidelimitError {
    /// Whether this error came from the backing store.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
impl From<redis::RedisError> for SlidelimitError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(Box::new(err))
    }
}
