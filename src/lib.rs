#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod rate_limiter;
pub use rate_limiter::*;

mod store;
pub use store::*;

mod clock;
pub use clock::*;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
pub mod redis;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{AttemptLimit, KeyPrefix, Namespace, RateLimitDecision, WindowSize};

#[cfg(test)]
mod tests;
