use std::time::Duration;

/// One primitive operation against a score-ordered collection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Delete every member whose score is strictly below the threshold.
    RemoveScoreBelow(f64),
    /// Count every member.
    CountAll,
    /// Count members whose score is at or above the threshold, without writing.
    CountScoreAtLeast(f64),
    /// Read the lowest score, if the collection has any member.
    OldestScore,
    /// Skip the rest of the transaction unless the latest count is below the limit.
    ///
    /// The latest count is the reply of the closest preceding `CountAll` or
    /// `CountScoreAtLeast`, or 0 if there is none.
    RequireCountBelow(u64),
    /// Insert a member, or move an existing member to the new score.
    AddScored {
        /// Sort key, fractional seconds since the UNIX epoch for attempts.
        score: f64,
        /// Member value; collections are sets, so equal members collapse.
        member: String,
    },
    /// Set the time-to-live of the whole collection.
    SetExpiry(Duration),
}

impl StoreOp {
    /// Whether the op never writes.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::CountAll
                | Self::CountScoreAtLeast(_)
                | Self::OldestScore
                | Self::RequireCountBelow(_)
        )
    }
}

/// Reply to one executed [`StoreOp`], in the same position as its op.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    /// Members removed by `RemoveScoreBelow`.
    Removed(u64),
    /// Result of `CountAll` or `CountScoreAtLeast`.
    Count(u64),
    /// Result of `OldestScore`.
    Oldest(Option<f64>),
    /// Whether a `RequireCountBelow` guard passed.
    Guard(bool),
    /// Whether `AddScored` created a new member.
    Added(bool),
    /// Whether `SetExpiry` found a collection to expire.
    ExpirySet(bool),
}

/// An ordered list of ops executed indivisibly against one collection.
///
/// ```
/// use std::time::Duration;
/// use slidelimit::Transaction;
///
/// let tx = Transaction::new()
///     .remove_score_below(90.0)
///     .count_all()
///     .require_count_below(10)
///     .add_scored(100.0, "100-a-1")
///     .set_expiry(Duration::from_secs(10));
///
/// assert_eq!(tx.ops().len(), 5);
/// assert!(!tx.is_read_only());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    ops: Vec<StoreOp>,
}

impl Transaction {
    /// An empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary op.
    pub fn push(mut self, op: StoreOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Append [`StoreOp::RemoveScoreBelow`].
    pub fn remove_score_below(self, threshold: f64) -> Self {
        self.push(StoreOp::RemoveScoreBelow(threshold))
    }

    /// Append [`StoreOp::CountAll`].
    pub fn count_all(self) -> Self {
        self.push(StoreOp::CountAll)
    }

    /// Append [`StoreOp::CountScoreAtLeast`].
    pub fn count_score_at_least(self, threshold: f64) -> Self {
        self.push(StoreOp::CountScoreAtLeast(threshold))
    }

    /// Append [`StoreOp::OldestScore`].
    pub fn oldest_score(self) -> Self {
        self.push(StoreOp::OldestScore)
    }

    /// Append [`StoreOp::RequireCountBelow`].
    pub fn require_count_below(self, limit: u64) -> Self {
        self.push(StoreOp::RequireCountBelow(limit))
    }

    /// Append [`StoreOp::AddScored`].
    pub fn add_scored(self, score: f64, member: impl Into<String>) -> Self {
        self.push(StoreOp::AddScored {
            score,
            member: member.into(),
        })
    }

    /// Append [`StoreOp::SetExpiry`].
    pub fn set_expiry(self, ttl: Duration) -> Self {
        self.push(StoreOp::SetExpiry(ttl))
    }

    /// The ops in execution order.
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// `true` when no op writes. Stores may serve such transactions from a replica.
    pub fn is_read_only(&self) -> bool {
        self.ops.iter().all(StoreOp::is_read_only)
    }

    /// `true` when the transaction has no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Replies of the ops a transaction actually executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOutcome {
    replies: Vec<StoreReply>,
}

impl TransactionOutcome {
    /// Build an outcome from replies in op order.
    pub fn new(replies: Vec<StoreReply>) -> Self {
        Self { replies }
    }

    /// Replies in op order. Ops skipped by a failed guard have none.
    pub fn replies(&self) -> &[StoreReply] {
        &self.replies
    }

    /// `true` if a [`StoreOp::RequireCountBelow`] guard stopped the transaction.
    pub fn halted(&self) -> bool {
        self.replies
            .iter()
            .any(|reply| matches!(reply, StoreReply::Guard(false)))
    }

    /// The last count reply, or 0 if no count op ran.
    pub fn last_count(&self) -> u64 {
        self.replies
            .iter()
            .rev()
            .find_map(|reply| match reply {
                StoreReply::Count(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// The last `OldestScore` reply, if one ran and found a member.
    pub fn oldest_score(&self) -> Option<f64> {
        self.replies.iter().rev().find_map(|reply| match reply {
            StoreReply::Oldest(score) => *score,
            _ => None,
        })
    }
}
