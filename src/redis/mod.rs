//! Redis-backed [`AtomicStore`](crate::AtomicStore).
//!
//! Each collection is one sorted set whose scores are attempt timestamps.
//! Supports a single server, Sentinel (optionally reading from a replica) and
//! Cluster (optionally validating slot coverage at startup).

mod options;
pub use options::*;

pub(crate) mod redis_store;
pub use redis_store::*;

pub(crate) mod connection;
