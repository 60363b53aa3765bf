//! Feed Fault Taxonomy and Reconnect Policy
//!
//! Classifies everything that can go wrong between the remote endpoint and a
//! subscriber, and holds the bounded fixed-delay retry policy that governs
//! automatic reconnection. None of these faults reach callers of the feed:
//! they are logged and counted, never raised.

use std::fmt;
use std::time::Duration;

/// Default delay before an automatic reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);

/// Default number of consecutive automatic reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Reconnect policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of consecutive automatic attempts
    pub max_attempts: u32,

    /// Fixed delay between a closure and the next attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may be scheduled after `attempts` consecutive failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Categorized feed faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Connect error, connect timeout or abnormal close
    Transport,

    /// Inbound frame that could not be deserialized
    MalformedPayload,

    /// Frame deserialized but failed the domain validity predicate
    InvalidEvent,

    /// A subscriber handler returned an error or panicked
    Subscriber,
}

impl FaultKind {
    /// Check if this fault is recovered by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaultKind::Transport)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Transport => "transport",
            FaultKind::MalformedPayload => "malformed_payload",
            FaultKind::InvalidEvent => "invalid_event",
            FaultKind::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a deserialized event was refused delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRejection {
    /// A required payload field is absent, not a string, or empty
    MissingField(&'static str),

    /// The payload is not a JSON object
    PayloadNotObject,
}

impl fmt::Display for EventRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRejection::MissingField(field) => {
                write!(f, "required field `{}` is missing or empty", field)
            }
            EventRejection::PayloadNotObject => f.write_str("payload is not an object"),
        }
    }
}

impl std::error::Error for EventRejection {}

impl EventRejection {
    pub fn fault(&self) -> FaultKind {
        FaultKind::InvalidEvent
    }
}
