//! Core types shared by queries, subscriptions and providers.

use crate::locale::Locale;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One materialized event, owned by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Provider record number.
    pub record_id: u64,
    /// Serialized event (XML, or JSON system fields when not rendering as XML).
    pub raw: String,
    /// Human-readable message with inserts substituted; empty when the
    /// provider has no template for the event.
    pub message: String,
    /// Substitution values, index-aligned to the template's `%n` placeholders.
    pub string_inserts: Vec<String>,
}

/// Opaque serialized cursor position.
///
/// The format belongs to the provider; this crate stores and replays it
/// verbatim.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkToken(String);

impl BookmarkToken {
    /// Rendering of a bookmark that has never captured a position.
    pub const EMPTY: &'static str = "<BookmarkList>\r\n</BookmarkList>";

    pub fn new(token: impl Into<String>) -> Self {
        BookmarkToken(token.into())
    }

    pub fn empty() -> Self {
        BookmarkToken(Self::EMPTY.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == Self::EMPTY || self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for BookmarkToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for BookmarkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BookmarkToken({:?})", self.0)
    }
}

impl fmt::Display for BookmarkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How `render()` formats events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Render the full event XML; otherwise a JSON object of system fields.
    pub render_as_xml: bool,
    /// Keep `Qualifiers` separate from `EventID`.
    pub preserve_qualifiers: bool,
    /// Keep the raw user SID instead of the resolved account name.
    pub preserve_sid: bool,
    /// Locale used to pick the message template.
    pub locale: Locale,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            render_as_xml: true,
            preserve_qualifiers: false,
            preserve_sid: false,
            locale: Locale::default(),
        }
    }
}

/// Lifecycle of a query cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Cancelled,
    Closed,
}

/// Whether a live subscription is still delivering backlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Draining,
    Tailing,
}

/// Lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Subscribed(DeliveryMode),
    Cancelled,
    Closed,
}

impl SubscriptionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriptionState::Cancelled | SubscriptionState::Closed)
    }
}

/// Identity of a query or subscription instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CursorId(pub u64);

static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

impl CursorId {
    pub(crate) fn next() -> Self {
        CursorId(NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}
