//! Bounded historical queries.

use crate::bookmark::Positioned;
use crate::cursor::{RecordCursor, Records};
use crate::error::{EventLogError, Result};
use crate::locale::Locale;
use crate::provider::{CancelToken, EventCursor, EventHandle, EventProvider, ProviderErrorKind};
use crate::render::render_message;
use crate::seek::SeekTarget;
use crate::session::Session;
use crate::types::{BookmarkToken, CursorId, CursorState, EventRecord, RenderOptions};
use std::sync::Arc;
use std::time::Duration;

/// A pull cursor over the events of one channel matching a filter.
///
/// # Example
///
/// ```
/// use evtlog::provider::{LogProvider, MemoryStore, NewEvent};
/// use evtlog::Query;
/// use std::sync::Arc;
///
/// let store = MemoryStore::with_channels(["Application"]);
/// store.append("Application", NewEvent::new("App", 1).message("Started %1").insert("web"))?;
///
/// let mut query = Query::new(Arc::new(LogProvider::new(store)), "Application", "*", None)?;
/// for record in query.each() {
///     assert_eq!(record?.message, "Started web");
/// }
/// # Ok::<(), evtlog::EventLogError>(())
/// ```
pub struct Query {
    id: CursorId,
    channel: String,
    filter: String,
    cursor: Option<Box<dyn EventCursor>>,
    cancel: CancelToken,
    current: Option<EventHandle>,
    position: BookmarkToken,
    options: RenderOptions,
    timeout: Option<Duration>,
    offset: i64,
}

impl Query {
    /// Open a query over `channel`.
    ///
    /// Fails with [`EventLogError::InvalidFilter`] for a malformed filter,
    /// [`EventLogError::ChannelNotFound`] for an unknown channel and
    /// [`EventLogError::RemoteConnect`] when the session's server is
    /// unreachable.
    pub fn new(
        provider: Arc<dyn EventProvider>,
        channel: &str,
        filter: &str,
        session: Option<&Session>,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let cursor = provider.open_query(channel, filter, session, cancel.clone())?;
        let id = CursorId::next();
        tracing::debug!(query = id.0, channel, filter, "opened query");
        Ok(Self {
            id,
            channel: channel.to_string(),
            filter: filter.to_string(),
            position: cursor.position(),
            cursor: Some(cursor),
            cancel,
            current: None,
            options: RenderOptions::default(),
            timeout: None,
            offset: 0,
        })
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn state(&self) -> CursorState {
        if self.cursor.is_none() {
            CursorState::Closed
        } else if self.cancel.is_cancelled() {
            CursorState::Cancelled
        } else {
            CursorState::Open
        }
    }

    /// Advance to the next matching event.
    ///
    /// Returns `false` when the result set is exhausted, the wait timed out
    /// or the query was cancelled.
    pub fn next(&mut self) -> Result<bool> {
        let timeout = self.timeout;
        if self.cursor.is_some() && self.cancel.is_cancelled() {
            return Ok(false);
        }
        let cursor = self.cursor.as_mut().ok_or(EventLogError::Closed)?;
        match cursor.advance(timeout) {
            Ok(Some(handle)) => {
                self.position = cursor.position();
                self.current = Some(handle);
                Ok(true)
            }
            Ok(None) => {
                self.current = None;
                Ok(false)
            }
            Err(e) if matches!(e.kind, ProviderErrorKind::Cancelled | ProviderErrorKind::Timeout) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Materialize the event the last successful [`next`](Self::next) moved to.
    pub fn render(&self) -> Result<EventRecord> {
        let cursor = self.cursor.as_ref().ok_or(EventLogError::Closed)?;
        let handle = self.current.as_ref().ok_or(EventLogError::NoCurrentEvent)?;
        let raw = cursor.materialize(handle, &self.options)?;
        let message = raw
            .template
            .as_deref()
            .map(|t| render_message(t, &raw.inserts))
            .unwrap_or_default();
        Ok(EventRecord {
            record_id: raw.record_id,
            raw: raw.raw,
            message,
            string_inserts: raw.inserts,
        })
    }

    /// Iterate the remaining events.
    pub fn each(&mut self) -> Records<'_, Self> {
        Records::new(self)
    }

    /// Release the current event's provider resource.
    pub fn close_handle(&mut self) {
        self.current = None;
    }

    /// Reposition the cursor so the next [`next`](Self::next) yields the target.
    ///
    /// Accepts `"first"`, `"last"`, `"current"` (optionally `|strict`), a
    /// `SEEK_*` bitmask, an [`Edge`](crate::seek::Edge), a
    /// [`RelativeFlag`](crate::seek::RelativeFlag) or a
    /// [`Bookmark`](crate::Bookmark). [`offset`](Self::offset) is applied
    /// relative to the target. Returns `false` when a strict seek is out of
    /// range or the bookmark cannot be located.
    pub fn seek<T>(&mut self, target: T) -> Result<bool>
    where
        T: TryInto<SeekTarget>,
        EventLogError: From<T::Error>,
    {
        let target: SeekTarget = target.try_into()?;
        if self.cursor.is_some() && self.cancel.is_cancelled() {
            return Err(EventLogError::InvalidState("query was cancelled".into()));
        }
        let request = target.into_request(self.offset);
        let timeout = self.timeout;
        let cursor = self.cursor.as_mut().ok_or(EventLogError::Closed)?;
        let moved = cursor.seek(&request, timeout)?;
        if moved {
            self.position = cursor.position();
            self.current = None;
        }
        Ok(moved)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset;
    }

    /// Abort a blocked or future `next()`. Safe from any thread through
    /// [`cancel_token`](Self::cancel_token).
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        self.current = None;
        if let Some(mut cursor) = self.cursor.take() {
            cursor.release();
            tracing::debug!(query = self.id.0, channel = %self.channel, "closed query");
        }
    }

    pub fn locale(&self) -> &'static str {
        self.options.locale.code()
    }

    /// Fails for an unknown code, keeping the previous locale.
    pub fn set_locale(&mut self, code: &str) -> Result<()> {
        self.options.locale = Locale::lookup(code)?;
        Ok(())
    }

    pub fn render_as_xml(&self) -> bool {
        self.options.render_as_xml
    }

    pub fn set_render_as_xml(&mut self, value: bool) {
        self.options.render_as_xml = value;
    }

    pub fn preserve_qualifiers(&self) -> bool {
        self.options.preserve_qualifiers
    }

    pub fn set_preserve_qualifiers(&mut self, value: bool) {
        self.options.preserve_qualifiers = value;
    }

    pub fn preserve_sid(&self) -> bool {
        self.options.preserve_sid
    }

    pub fn set_preserve_sid(&mut self, value: bool) {
        self.options.preserve_sid = value;
    }

    pub fn render_options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn set_render_options(&mut self, options: RenderOptions) {
        self.options = options;
    }
}

impl RecordCursor for Query {
    fn advance(&mut self) -> Result<bool> {
        self.next()
    }

    fn current(&self) -> Result<EventRecord> {
        self.render()
    }

    fn release_current(&mut self) {
        self.close_handle();
    }
}

impl crate::bookmark::sealed::Sealed for Query {}

impl Positioned for Query {
    fn cursor_id(&self) -> CursorId {
        self.id
    }

    fn position(&self) -> BookmarkToken {
        self.position.clone()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("filter", &self.filter)
            .field("state", &self.state())
            .finish()
    }
}
