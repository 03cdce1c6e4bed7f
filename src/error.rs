//! Error types for event log cursors.

use crate::provider::{ProviderError, ProviderErrorKind};
use std::fmt;
use thiserror::Error;

/// A query failure reported by the provider.
///
/// Displays in the provider's native shape so callers can match on the code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryError {
    pub code: u32,
    pub message: String,
}

impl QueryError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode: {}\nError: {}\n", self.code, self.message)
    }
}

impl std::error::Error for QueryError {}

/// Main error type for query and subscription operations.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(QueryError),

    #[error("{0}")]
    Query(QueryError),

    /// Bad seek flag, rate limit, locale or session flag.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Failed to connect to {server}: {message}")]
    RemoteConnect { server: String, message: String },

    #[error("Cursor is closed")]
    Closed,

    #[error("No current event (call next() first)")]
    NoCurrentEvent,

    #[error("Not subscribed to any channel")]
    NotSubscribed,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Provider error {code}: {message}")]
    Provider { code: u32, message: String },
}

impl EventLogError {
    /// Shorthand for the argument-error class.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        EventLogError::InvalidArgument(message.into())
    }
}

impl From<ProviderError> for EventLogError {
    fn from(e: ProviderError) -> Self {
        match e.kind {
            ProviderErrorKind::ChannelNotFound => EventLogError::ChannelNotFound(e.message),
            ProviderErrorKind::InvalidQuery => {
                EventLogError::InvalidFilter(QueryError::new(e.code, e.message))
            }
            ProviderErrorKind::InvalidBookmark | ProviderErrorKind::QueryFailed => {
                EventLogError::Query(QueryError::new(e.code, e.message))
            }
            ProviderErrorKind::RemoteConnect { server } => EventLogError::RemoteConnect {
                server,
                message: e.message,
            },
            ProviderErrorKind::LocaleNotFound => EventLogError::InvalidArgument(e.message),
            ProviderErrorKind::Corruption => EventLogError::Corruption(e.message),
            ProviderErrorKind::Io
            | ProviderErrorKind::Cancelled
            | ProviderErrorKind::Timeout
            | ProviderErrorKind::Unsupported => EventLogError::Provider {
                code: e.code,
                message: e.message,
            },
        }
    }
}

impl From<std::convert::Infallible> for EventLogError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EventLogError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EventLogError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
