use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use crate::{
    AtomicStore, SlidelimitError, StoreOp, StoreReply, Transaction, TransactionOutcome,
    redis::{
        RedisStoreOptions,
        connection::{self, RedisConnection, RedisConnections},
    },
};

// Interprets the op list in ARGV against the sorted set in KEYS[1]. Every
// reply is an integer; OLDEST replies in microseconds, or -1 when empty.
const TRANSACTION_SCRIPT: &str = r#"
    local key = KEYS[1]
    local replies = {}
    local last_count = 0
    local i = 1

    while i <= #ARGV do
        local op = ARGV[i]

        if op == "zremrangebyscore" then
            replies[#replies + 1] = redis.call("ZREMRANGEBYSCORE", key, "-inf", "(" .. ARGV[i + 1])
            i = i + 2
        elseif op == "zcard" then
            last_count = redis.call("ZCARD", key)
            replies[#replies + 1] = last_count
            i = i + 1
        elseif op == "zcount" then
            last_count = redis.call("ZCOUNT", key, ARGV[i + 1], "+inf")
            replies[#replies + 1] = last_count
            i = i + 2
        elseif op == "oldest" then
            local oldest = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
            if #oldest == 0 then
                replies[#replies + 1] = -1
            else
                replies[#replies + 1] = math.floor(tonumber(oldest[2]) * 1000000)
            end
            i = i + 1
        elseif op == "guard" then
            if last_count >= tonumber(ARGV[i + 1]) then
                replies[#replies + 1] = 0
                return replies
            end
            replies[#replies + 1] = 1
            i = i + 2
        elseif op == "zadd" then
            replies[#replies + 1] = redis.call("ZADD", key, ARGV[i + 1], ARGV[i + 2])
            i = i + 3
        elseif op == "pexpire" then
            replies[#replies + 1] = redis.call("PEXPIRE", key, ARGV[i + 1])
            i = i + 2
        else
            return redis.error_reply("unknown transaction op " .. tostring(op))
        end
    end

    return replies
"#;

/// Redis-backed [`AtomicStore`] using one sorted set per collection.
///
/// # Atomicity
///
/// A transaction with writes is sent as a single Lua script execution
/// (`EVALSHA`, reloaded transparently on `NOSCRIPT`). Redis runs scripts
/// without interleaving other commands, so every op observes the same
/// collection state and the whole transaction commits indivisibly.
///
/// A read-only transaction of a single op is sent as one plain command
/// (`ZCARD`, `ZCOUNT` or `ZRANGE`), which is atomic on its own and may be
/// served by a replica when the store was connected with
/// `prefer_replica_reads`.
///
/// # Requirements
///
/// - **Redis version:** >= 6.2.0
/// - **Runtime:** Tokio or Smol (via `redis-tokio` or `redis-smol` features)
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> Result<(), slidelimit::SlidelimitError> {
/// use std::time::Duration;
/// use slidelimit::redis::{RedisStore, RedisStoreOptions};
/// use slidelimit::{Namespace, RateLimiter, StoreHandle};
///
/// let store = RedisStore::connect(&RedisStoreOptions::default()).await?;
/// let limiter = RateLimiter::try_new(StoreHandle::new(store), Duration::from_secs(60), 100)?;
///
/// let allowed = limiter.attempt(&Namespace::try_from("10.0.0.7")?).await?;
/// # let _ = allowed;
/// # Ok(())
/// # }
/// ```
pub struct RedisStore {
    primary: RedisConnection,
    replica: Option<RedisConnection>,
    script: Script,
}

impl RedisStore {
    /// Connect according to `options`.
    ///
    /// Invalid options are [`SlidelimitError::InvalidConfiguration`];
    /// unreachable servers are [`SlidelimitError::StoreUnavailable`].
    pub async fn connect(options: &RedisStoreOptions) -> Result<Self, SlidelimitError> {
        let RedisConnections { primary, replica } = connection::connect(options).await?;

        Ok(Self::from_connections(primary, replica))
    }

    /// Wrap an existing connection manager to a single Redis server.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self::from_connections(RedisConnection::Managed(connection_manager), None)
    }

    fn from_connections(primary: RedisConnection, replica: Option<RedisConnection>) -> Self {
        Self {
            primary,
            replica,
            script: Script::new(TRANSACTION_SCRIPT),
        }
    }

    async fn run_script(
        &self,
        collection: &str,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        let mut invocation = self.script.prepare_invoke();
        invocation.key(collection);

        for op in tx.ops() {
            match op {
                StoreOp::RemoveScoreBelow(threshold) => {
                    invocation.arg("zremrangebyscore").arg(score_arg(*threshold));
                }
                StoreOp::CountAll => {
                    invocation.arg("zcard");
                }
                StoreOp::CountScoreAtLeast(threshold) => {
                    invocation.arg("zcount").arg(score_arg(*threshold));
                }
                StoreOp::OldestScore => {
                    invocation.arg("oldest");
                }
                StoreOp::RequireCountBelow(limit) => {
                    invocation.arg("guard").arg(*limit);
                }
                StoreOp::AddScored { score, member } => {
                    invocation
                        .arg("zadd")
                        .arg(score_arg(*score))
                        .arg(member.as_str());
                }
                StoreOp::SetExpiry(ttl) => {
                    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                    invocation.arg("pexpire").arg(millis.max(1));
                }
            }
        }

        let raw: Vec<i64> = self.primary.invoke(&invocation).await?;

        Ok(decode_replies(tx.ops(), &raw))
    } // end method run_script

    async fn run_single_read(
        &self,
        collection: &str,
        op: &StoreOp,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        let conn = self.replica.as_ref().unwrap_or(&self.primary);

        let reply = match op {
            StoreOp::CountAll => {
                StoreReply::Count(conn.query(redis::cmd("ZCARD").arg(collection)).await?)
            }
            StoreOp::CountScoreAtLeast(threshold) => StoreReply::Count(
                conn.query(
                    redis::cmd("ZCOUNT")
                        .arg(collection)
                        .arg(score_arg(*threshold))
                        .arg("+inf"),
                )
                .await?,
            ),
            StoreOp::OldestScore => {
                let oldest: Vec<(String, f64)> = conn
                    .query(
                        redis::cmd("ZRANGE")
                            .arg(collection)
                            .arg(0)
                            .arg(0)
                            .arg("WITHSCORES"),
                    )
                    .await?;

                StoreReply::Oldest(oldest.first().map(|(_, score)| *score))
            }
            StoreOp::RequireCountBelow(limit) => StoreReply::Guard(0 < *limit),
            op => unreachable!("write op {op:?} in a read-only transaction"),
        };

        Ok(TransactionOutcome::new(vec![reply]))
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn run_atomically(
        &self,
        collection: &str,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, SlidelimitError> {
        match tx.ops() {
            [] => Ok(TransactionOutcome::default()),
            [op] if op.is_read_only() => self.run_single_read(collection, op).await,
            _ => self.run_script(collection, tx).await,
        }
    }
}

// Rust's float Display never uses exponent notation, which Redis would reject.
fn score_arg(score: f64) -> String {
    score.to_string()
}

pub(crate) fn decode_replies(ops: &[StoreOp], raw: &[i64]) -> TransactionOutcome {
    let replies = ops
        .iter()
        .zip(raw)
        .map(|(op, &value)| match op {
            StoreOp::RemoveScoreBelow(_) => StoreReply::Removed(value.max(0) as u64),
            StoreOp::CountAll | StoreOp::CountScoreAtLeast(_) => {
                StoreReply::Count(value.max(0) as u64)
            }
            StoreOp::OldestScore => {
                StoreReply::Oldest((value >= 0).then(|| value as f64 / 1_000_000.0))
            }
            StoreOp::RequireCountBelow(_) => StoreReply::Guard(value == 1),
            StoreOp::AddScored { .. } => StoreReply::Added(value == 1),
            StoreOp::SetExpiry(_) => StoreReply::ExpirySet(value == 1),
        })
        .collect();

    TransactionOutcome::new(replies)
}
