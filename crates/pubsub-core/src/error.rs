//! # Error Types
//!
//! Registration errors are terminal and surface during bootstrap. Delivery
//! errors are ordinary outcomes handed back to the broker, which decides
//! whether to redeliver.

use std::fmt;
use thiserror::Error;

/// Error type returned by application handlers.
///
/// Handler errors pass through the pipeline unchanged, so callers can
/// `downcast_ref` to their own error types.
pub type HandlerError = anyhow::Error;

/// The naming rule a topic or subscription identifier broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameViolation {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong { len: usize, max: usize },
    /// The first character is not a lowercase letter.
    MustStartWithLetter,
    /// The last character is neither a lowercase letter nor a digit.
    MustEndWithLetterOrDigit,
    /// A character outside `[a-z0-9-]`.
    InvalidCharacter(char),
}

impl fmt::Display for NameViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong { len, max } => {
                write!(f, "name is {len} characters long, maximum is {max}")
            }
            Self::MustStartWithLetter => write!(f, "name must start with a lowercase letter"),
            Self::MustEndWithLetterOrDigit => {
                write!(f, "name must end with a lowercase letter or digit")
            }
            Self::InvalidCharacter(c) => write!(
                f,
                "invalid character {c:?} (only lowercase letters, digits and hyphens are allowed)"
            ),
        }
    }
}

/// Bootstrap-time configuration errors.
///
/// These represent a mismatch between the application code and its
/// deployment. They are never produced once traffic is being served.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid topic name {name:?}: {violation}")]
    InvalidTopicName { name: String, violation: NameViolation },

    #[error("invalid subscription name {name:?}: {violation}")]
    InvalidSubscriptionName { name: String, violation: NameViolation },

    #[error("{field} cannot be negative")]
    NegativeBackoff { field: &'static str },

    #[error("min backoff ({min:?}) is greater than max backoff ({max:?})")]
    InvertedBackoff {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("unregistered/unknown subscription on topic {topic}: {subscription}")]
    UnknownSubscription { topic: String, subscription: String },

    #[error("subscription {subscription} is already registered on topic {topic}")]
    DuplicateSubscription { topic: String, subscription: String },

    #[error("failed to load deployment config: {0}")]
    Load(String),

    #[error("broker rejected subscription: {0}")]
    Broker(String),
}

/// Errors raised by a broker adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("subscription {subscription} already exists on topic {topic}")]
    AlreadySubscribed { topic: String, subscription: String },

    #[error("no subscription {subscription} on topic {topic}")]
    UnknownSubscription { topic: String, subscription: String },

    #[error("broker is shut down")]
    Closed,
}

/// Failure to turn an envelope into a typed message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid bincode payload: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
}

/// Tracing infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("span could not be started: {0}")]
    Begin(String),
}

/// Coarse classification of a delivery error, mirrored into traces and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A failure inside the dispatch machinery (decode, tracing, panic).
    Internal,
    /// An application error whose classification belongs to the handler.
    Unknown,
}

impl ErrorCode {
    /// Stable lowercase name used in span fields and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome of one failed delivery attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to unmarshal message: {0}")]
    Decode(#[source] DecodeError),

    #[error("failed to begin request: {0}")]
    Trace(#[source] TraceError),

    #[error("subscriber panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Handler(HandlerError),
}

impl DispatchError {
    /// Classification of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Decode(_) | Self::Trace(_) | Self::Panicked(_) => ErrorCode::Internal,
            Self::Handler(_) => ErrorCode::Unknown,
        }
    }

    /// Whether the dispatch machinery, not the handler, produced this error.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.code() == ErrorCode::Internal
    }

    /// The handler's own error, if this failure came from the handler.
    #[must_use]
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(err) => Some(err),
            _ => None,
        }
    }
}
