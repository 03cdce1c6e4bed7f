//! Event provider capability.
//!
//! Queries and subscriptions never touch storage directly. They drive an
//! [`EventCursor`] obtained from an [`EventProvider`]:
//!
//! - `open_query` / `open_subscription` create a cursor
//! - `advance` moves to the next matching event and hands out an [`EventHandle`]
//! - `materialize` renders a handle into raw text, template and inserts
//! - `position` reports a [`BookmarkToken`] for the current position
//! - `release` frees the cursor
//!
//! Cancellation is cooperative through a shared [`CancelToken`], so it can be
//! triggered from another thread while `advance` is blocked.
//!
//! [`LogProvider`] implements the contract over any [`EventStore`]; the crate
//! ships an in-process [`MemoryStore`] and an on-disk [`JournalStore`].

mod cancel;
mod event;
mod filter;
mod journal;
mod log;
mod memory;

pub use cancel::CancelToken;
pub use event::{NewEvent, StoredEvent, SystemFields};
pub use filter::Filter;
pub use journal::{JournalConfig, JournalStore};
pub use log::{EventStore, LogProvider};
pub use memory::MemoryStore;

use crate::session::Session;
use crate::types::{BookmarkToken, RenderOptions};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Provider status codes.
pub mod codes {
    pub const INVALID_HANDLE: u32 = 6;
    pub const NO_MORE_ITEMS: u32 = 259;
    pub const CANCELLED: u32 = 1223;
    pub const TIMEOUT: u32 = 1460;
    pub const RPC_SERVER_UNAVAILABLE: u32 = 1722;
    pub const INVALID_QUERY: u32 = 15001;
    pub const CHANNEL_NOT_FOUND: u32 = 15007;
    pub const QUERY_RESULT_STALE: u32 = 15011;
    pub const INVALID_BOOKMARK: u32 = 15012;
    pub const MESSAGE_LOCALE_NOT_FOUND: u32 = 15033;
    pub const NOT_SUPPORTED: u32 = 50;
    pub const IO: u32 = 1117;
    pub const CORRUPTION: u32 = 1392;
}

/// Classification of provider failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    ChannelNotFound,
    InvalidQuery,
    /// The bookmark is malformed, stale, or points at a different channel.
    InvalidBookmark,
    QueryFailed,
    RemoteConnect { server: String },
    LocaleNotFound,
    Cancelled,
    Timeout,
    Unsupported,
    Io,
    Corruption,
}

/// Error reported by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub code: u32,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// The message is the channel name.
    pub fn channel_not_found(channel: &str) -> Self {
        Self::new(
            ProviderErrorKind::ChannelNotFound,
            codes::CHANNEL_NOT_FOUND,
            channel,
        )
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidQuery, codes::INVALID_QUERY, message)
    }

    pub fn invalid_bookmark(message: impl Into<String>) -> Self {
        Self::new(
            ProviderErrorKind::InvalidBookmark,
            codes::INVALID_BOOKMARK,
            message,
        )
    }

    pub fn cancelled() -> Self {
        Self::new(
            ProviderErrorKind::Cancelled,
            codes::CANCELLED,
            "The operation was canceled by the user.",
        )
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unsupported, codes::NOT_SUPPORTED, message)
    }

    pub fn released() -> Self {
        Self::new(
            ProviderErrorKind::QueryFailed,
            codes::INVALID_HANDLE,
            "The handle is invalid.",
        )
    }

    /// Whether a bookmark-anchored subscribe may be retried without the bookmark.
    pub fn is_bookmark_rejection(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::InvalidBookmark)
            || self.code == codes::QUERY_RESULT_STALE
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode: {}\nError: {}\n", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::new(ProviderErrorKind::Io, codes::IO, e.to_string())
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Where a live subscription starts reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscribeStart {
    /// Deliver the channel's backlog first.
    OldestRecord,
    /// Only events appended after the subscription opens.
    FutureEvents,
    /// Events after the bookmarked one.
    AfterBookmark(BookmarkToken),
}

/// Seek origin understood by providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeekOrigin {
    First,
    Last,
    Current,
    Bookmark(BookmarkToken),
}

/// A provider seek request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeekRequest {
    pub origin: SeekOrigin,
    pub offset: i64,
    /// Fail instead of clamping when the target is out of range.
    pub strict: bool,
}

/// Per-record provider resource acquired by `advance`.
///
/// Dropping the handle releases the resource.
pub struct EventHandle {
    record_id: u64,
    resource: Box<dyn Any + Send>,
}

impl EventHandle {
    pub fn new(record_id: u64, resource: impl Any + Send) -> Self {
        Self {
            record_id,
            resource: Box::new(resource),
        }
    }

    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    /// Provider-side view of the resource.
    pub fn resource<T: Any>(&self) -> Option<&T> {
        self.resource.downcast_ref::<T>()
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandle({})", self.record_id)
    }
}

/// A materialized event before message substitution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub record_id: u64,
    pub raw: String,
    /// Message template for the requested locale, if the provider has one.
    pub template: Option<String>,
    pub inserts: Vec<String>,
}

/// Channel configuration type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    Admin,
    Operational,
    Analytic,
    Debug,
}

impl ChannelKind {
    /// Analytic and debug channels are only listed when enumeration is forced.
    pub fn is_subscribable(self) -> bool {
        matches!(self, ChannelKind::Admin | ChannelKind::Operational)
    }
}

/// Channel listing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    pub enabled: bool,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
        }
    }
}

/// A cursor exclusively owned by one query or subscription.
pub trait EventCursor: Send {
    /// Move to the next event.
    ///
    /// Returns `Ok(None)` when no event is available within `timeout`
    /// (`None` = do not wait), and `Err` with [`ProviderErrorKind::Cancelled`]
    /// once the cursor's cancel token fires.
    fn advance(&mut self, timeout: Option<Duration>) -> ProviderResult<Option<EventHandle>>;

    /// Reposition so the next `advance` yields the target event.
    ///
    /// Returns `Ok(false)` when a strict seek is out of range or the
    /// bookmark cannot be located.
    fn seek(&mut self, request: &SeekRequest, timeout: Option<Duration>) -> ProviderResult<bool>;

    fn materialize(&self, handle: &EventHandle, options: &RenderOptions) -> ProviderResult<RawEvent>;

    /// Token for the last event handed out by `advance` (or the starting
    /// position if none has been).
    fn position(&self) -> BookmarkToken;

    /// Free the cursor. Further calls are no-ops.
    fn release(&mut self);
}

/// Source of event cursors.
pub trait EventProvider: Send + Sync {
    fn open_query(
        &self,
        channel: &str,
        filter: &str,
        session: Option<&Session>,
        cancel: CancelToken,
    ) -> ProviderResult<Box<dyn EventCursor>>;

    fn open_subscription(
        &self,
        channel: &str,
        filter: &str,
        start: SubscribeStart,
        session: Option<&Session>,
        cancel: CancelToken,
    ) -> ProviderResult<Box<dyn EventCursor>>;

    fn channels(&self) -> ProviderResult<Vec<ChannelInfo>>;
}
