use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    AtomicStore, Clock, SlidelimitError, StoreOp, StoreReply, SystemClock, Transaction,
    TransactionOutcome,
};

/// In-process [`AtomicStore`] backed by a [`DashMap`].
///
/// A transaction holds the map entry for its collection for its whole
/// duration, so transactions on one collection are serialized while other
/// collections proceed in parallel (up to shard sharing). Read-only
/// transactions take a shared lock and never create a collection.
///
/// Expiry is tracked against the store's [`Clock`]: an expired collection
/// reads as empty and is replaced by the next write. Expired collections stay
/// in memory until [`MemoryStore::cleanup`] runs.
///
/// State is process-local; use a shared store to limit across processes.
pub struct MemoryStore {
    collections: DashMap<String, ScoredCollection>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct ScoredCollection {
    // ascending by score
    members: Vec<(f64, String)>,
    expires_at: Option<Duration>,
}

impl ScoredCollection {
    fn is_expired(&self, now: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn below(&self, threshold: f64) -> usize {
        self.members.partition_point(|(score, _)| *score < threshold)
    }

    fn read(&self, op: &StoreOp) -> StoreReply {
        match op {
            StoreOp::CountAll => StoreReply::Count(self.members.len() as u64),
            StoreOp::CountScoreAtLeast(threshold) => {
                StoreReply::Count((self.members.len() - self.below(*threshold)) as u64)
            }
            StoreOp::OldestScore => {
                StoreReply::Oldest(self.members.first().map(|(score, _)| *score))
            }
            _ => unreachable!("write op {op:?} in a read-only transaction"),
        }
    }

    fn apply(&mut self, op: &StoreOp, now: Duration) -> StoreReply {
        match op {
            StoreOp::RemoveScoreBelow(threshold) => {
                let removed = self.below(*threshold);
                self.members.drain(..removed);
                if self.members.is_empty() {
                    self.expires_at = None;
                }

                StoreReply::Removed(removed as u64)
            }
            StoreOp::AddScored { score, member } => {
                let existing = self.members.iter().position(|(_, m)| m == member);
                if let Some(index) = existing {
                    self.members.remove(index);
                }

                let index = self.members.partition_point(|(s, _)| *s <= *score);
                self.members.insert(index, (*score, member.clone()));

                StoreReply::Added(existing.is_none())
            }
            StoreOp::SetExpiry(ttl) => {
                if self.members.is_empty() {
                    return StoreReply::ExpirySet(false);
                }
                // A TTL past the clock's range never expires.
                self.expires_at = now.checked_add(*ttl);

                StoreReply::ExpirySet(true)
            }
            op => self.read(op),
        }
    }
}

// Runs ops in order, evaluating guards against the latest count and stopping
// at the first failed guard.
fn execute(ops: &[StoreOp], mut apply: impl FnMut(&StoreOp) -> StoreReply) -> Vec<StoreReply> {
    let mut replies = Vec::with_capacity(ops.len());
    let mut last_count = 0;

    for op in ops {
        let reply = match op {
            StoreOp::RequireCountBelow(limit) => StoreReply::Guard(last_count < *limit),
            op => apply(op),
        };

        if let StoreReply::Count(n) = reply {
            last_count = n;
        }

        let halted = matches!(reply, StoreReply::Guard(false));
        replies.push(reply);

        if halted {
            break;
        }
    }

    replies
}

impl MemoryStore {
    /// A store using the system clock for expiry.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A store using `clock` for expiry.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: DashMap::new(),
            clock,
        }
    }

    /// Number of collections held, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// `true` when no collection is held.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Drop expired and empty collections. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let before = self.collections.len();

        self.collections
            .retain(|_, collection| !collection.is_expired(now) && !collection.members.is_empty());

        before.saturating_sub(self.collections.len())
    }

    /// Periodically run [`MemoryStore::cleanup`] on the active runtime.
    ///
    /// The task holds a weak reference and stops once the store is dropped.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    pub fn run_cleanup_loop(self: &Arc<Self>, every: Duration) {
        let store = Arc::downgrade(self);

        crate::runtime::spawn_task(async move {
            loop {
                crate::runtime::sleep(every).await;

                let Some(store) = store.upgrade() else {
                    break;
                };

                let removed = store.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "memory_store.cleanup");
                }
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn run_atomically(
        &self,
        collection: &str,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        let now = self.clock.now();

        if tx.is_read_only() {
            let empty = ScoredCollection::default();
            let entry = self.collections.get(collection);
            let view = entry
                .as_deref()
                .filter(|c| !c.is_expired(now))
                .unwrap_or(&empty);

            return Ok(TransactionOutcome::new(execute(tx.ops(), |op| view.read(op))));
        }

        let mut entry = self.collections.entry(collection.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = ScoredCollection::default();
        }

        let replies = execute(tx.ops(), |op| entry.apply(op, now));

        Ok(TransactionOutcome::new(replies))
    }
}
