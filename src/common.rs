use std::{fmt, ops::Deref, sync::Arc, time::Duration};

use crate::SlidelimitError;

/// Length of the trailing window an attempt counts against.
///
/// Must be at least 1ms and at most [`WindowSize::MAX`]. Stored with
/// millisecond resolution in collection keys, so sub-millisecond windows are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowSize(Duration);

impl WindowSize {
    /// Largest accepted window: `i64::MAX` milliseconds, the longest TTL a
    /// Redis `PEXPIRE` takes.
    pub const MAX: Duration = Duration::from_millis(i64::MAX as u64);

    /// The window as fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub(crate) fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }
}

impl Deref for WindowSize {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Duration> for WindowSize {
    type Error = SlidelimitError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        if value.as_millis() == 0 {
            Err(SlidelimitError::InvalidConfiguration(
                "Window size must be at least 1ms".to_string(),
            ))
        } else if value > Self::MAX {
            Err(SlidelimitError::InvalidConfiguration(format!(
                "Window size must be at most {}ms",
                Self::MAX.as_millis()
            )))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<u64> for WindowSize {
    type Error = SlidelimitError;

    /// Window size in whole seconds.
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::try_from(Duration::from_secs(value))
    }
}

/// Maximum number of attempts admitted per window. Must be greater than 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptLimit(u64);

impl Deref for AttemptLimit {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for AttemptLimit {
    type Error = SlidelimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(SlidelimitError::InvalidConfiguration(
                "Attempt limit must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// The entity being rate limited (user id, IP address, API key, ...).
///
/// Constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
///
/// Colons are allowed, so IPv6 addresses can be used directly.
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct Namespace(Arc<str>);

impl Deref for Namespace {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Namespace {
    type Error = SlidelimitError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(SlidelimitError::InvalidNamespace(
                "Namespace must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(SlidelimitError::InvalidNamespace(
                "Namespace must not be longer than 255 bytes".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<String> for Namespace {
    type Error = SlidelimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// A validated prefix for every collection key the limiter touches.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// The prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("slidelimit"))
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::default_prefix()
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = SlidelimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(SlidelimitError::InvalidConfiguration(
                "Key prefix must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(SlidelimitError::InvalidConfiguration(
                "Key prefix must not be longer than 255 bytes".to_string(),
            ))
        } else if value.contains(':') {
            Err(SlidelimitError::InvalidConfiguration(
                "Key prefix must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

/// Outcome of [`RateLimiter::attempt_decision`](crate::RateLimiter::attempt_decision).
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// The attempt was admitted and recorded.
    Allowed,
    /// The attempt was rejected and nothing was recorded.
    ///
    /// Includes best-effort hints for callers that want to communicate backoff.
    Rejected {
        /// Sliding window used for the decision.
        window: Duration,
        /// Time until the oldest recorded attempt leaves the window.
        retry_after: Duration,
        /// Attempts counted in the window when the decision was made.
        current_count: u64,
    },
}

impl RateLimitDecision {
    /// `true` for [`RateLimitDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
