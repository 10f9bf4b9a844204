//! The atomic, score-ordered store the limiter runs its transactions against.
//!
//! Correctness of the limiter rests entirely on one property of
//! [`AtomicStore::run_atomically`]: every op of a [`Transaction`] observes the
//! same snapshot of the collection and commits indivisibly relative to any
//! other transaction on that collection. Transactions on different
//! collections never need to coordinate.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::SlidelimitError;

mod transaction;
pub use transaction::*;

mod memory;
pub use memory::*;

/// A shared store exposing score-ordered-set primitives and atomic execution
/// of a [`Transaction`] against a single named collection.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Execute `tx` against `collection` as one indivisible unit.
    ///
    /// Returns the replies of the executed ops. Any backend failure is
    /// [`SlidelimitError::StoreUnavailable`]; implementations do not retry.
    async fn run_atomically(
        &self,
        collection: &str,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError>;
}

/// An explicit, clonable slot holding the store a limiter talks to.
///
/// Build one per process (or per test), initialize it once, and pass clones
/// to every [`RateLimiter`](crate::RateLimiter). A limiter used through an
/// uninitialized handle fails with [`SlidelimitError::NotInitialized`]; no
/// connection is ever created implicitly.
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Arc<OnceLock<Arc<dyn AtomicStore>>>,
}

impl StoreHandle {
    /// A handle that is already initialized with `store`.
    pub fn new<S>(store: S) -> Self
    where
        S: AtomicStore + 'static,
    {
        Self::from(Arc::new(store) as Arc<dyn AtomicStore>)
    }

    /// A handle with no store yet. See [`StoreHandle::init`].
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Fill an uninitialized handle. Every clone of the handle observes the store.
    ///
    /// Fails with [`SlidelimitError::InvalidConfiguration`] if the handle was
    /// already initialized.
    pub fn init(&self, store: Arc<dyn AtomicStore>) -> Result<(), SlidelimitError> {
        self.inner.set(store).map_err(|_| {
            SlidelimitError::InvalidConfiguration("store handle already initialized".to_string())
        })
    }

    /// Whether a store has been set.
    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    pub(crate) fn get(&self) -> Result<&Arc<dyn AtomicStore>, SlidelimitError> {
        self.inner.get().ok_or(SlidelimitError::NotInitialized)
    }
}

impl From<Arc<dyn AtomicStore>> for StoreHandle {
    fn from(store: Arc<dyn AtomicStore>) -> Self {
        Self {
            inner: Arc::new(OnceLock::from(store)),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
