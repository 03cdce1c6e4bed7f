//! Live subscriptions with bookmark resume and delivery throttling.

use crate::bookmark::{Bookmark, Positioned};
use crate::cursor::{RecordCursor, Records};
use crate::error::{EventLogError, QueryError, Result};
use crate::locale::Locale;
use crate::provider::{
    CancelToken, EventCursor, EventHandle, EventProvider, ProviderErrorKind, SubscribeStart,
};
use crate::rate_limit::{RateLimit, RateLimitPolicy, RateLimiter, RATE_INFINITE};
use crate::render::render_message;
use crate::session::Session;
use crate::types::{
    BookmarkToken, CursorId, DeliveryMode, EventRecord, RenderOptions, SubscriptionState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Subscription settings, loadable from a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeConfig {
    /// Drain the channel's backlog before live events (fresh subscribes only).
    pub read_existing_events: bool,
    /// Only deliver events arriving after the subscribe.
    pub tail: bool,
    /// Events per second, or [`RATE_INFINITE`].
    pub rate_limit: u32,
    /// Accepted `rate_limit` values.
    pub rate_limit_policy: RateLimitPolicy,
    /// How long one `next()` may wait for a new event.
    pub timeout: Option<Duration>,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            read_existing_events: false,
            tail: false,
            rate_limit: RATE_INFINITE,
            rate_limit_policy: RateLimitPolicy::default(),
            timeout: None,
        }
    }
}

struct Active {
    channel: String,
    filter: String,
    cursor: Box<dyn EventCursor>,
    mode: DeliveryMode,
}

/// A live cursor over one channel.
///
/// `next()` never spawns threads or blocks longer than the configured
/// timeout; callers drive the polling loop and call
/// [`close_handle`](Self::close_handle) after each record.
pub struct Subscribe {
    id: CursorId,
    provider: Arc<dyn EventProvider>,
    read_existing_events: bool,
    tail: bool,
    policy: RateLimitPolicy,
    limiter: RateLimiter,
    timeout: Option<Duration>,
    options: RenderOptions,
    cancel: CancelToken,
    active: Option<Active>,
    current: Option<EventHandle>,
    position: BookmarkToken,
    query_error: Option<QueryError>,
    closed: bool,
}

impl Subscribe {
    pub fn new(provider: Arc<dyn EventProvider>) -> Self {
        Self {
            id: CursorId::next(),
            provider,
            read_existing_events: false,
            tail: false,
            policy: RateLimitPolicy::default(),
            limiter: RateLimiter::new(RateLimit::Infinite),
            timeout: None,
            options: RenderOptions::default(),
            cancel: CancelToken::new(),
            active: None,
            current: None,
            position: BookmarkToken::empty(),
            query_error: None,
            closed: false,
        }
    }

    /// Build from a config, validating the rate limit.
    pub fn with_config(provider: Arc<dyn EventProvider>, config: SubscribeConfig) -> Result<Self> {
        let limit = config.rate_limit_policy.validate(config.rate_limit)?;
        let mut subscribe = Self::new(provider);
        subscribe.read_existing_events = config.read_existing_events;
        subscribe.tail = config.tail;
        subscribe.policy = config.rate_limit_policy;
        subscribe.limiter.set_limit(limit);
        subscribe.timeout = config.timeout;
        Ok(subscribe)
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        if self.closed {
            SubscriptionState::Closed
        } else if self.cancel.is_cancelled() {
            SubscriptionState::Cancelled
        } else {
            match &self.active {
                Some(active) => SubscriptionState::Subscribed(active.mode),
                None => SubscriptionState::Created,
            }
        }
    }

    /// Channel of the active subscription.
    pub fn channel(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.channel.as_str())
    }

    pub fn filter(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.filter.as_str())
    }

    fn fresh_start(&self) -> SubscribeStart {
        if self.tail || !self.read_existing_events {
            SubscribeStart::FutureEvents
        } else {
            SubscribeStart::OldestRecord
        }
    }

    /// (Re)subscribe to `channel`, replacing any previous subscription.
    ///
    /// With a bookmark, delivery resumes after the bookmarked event. If the
    /// provider rejects the bookmark (stale, malformed, other channel) the
    /// rejection is kept in [`query_error`](Self::query_error) and a
    /// subscribe without the bookmark is made instead. Other failures are
    /// returned and leave the previous subscription in place.
    pub fn subscribe(
        &mut self,
        channel: &str,
        filter: &str,
        bookmark: Option<&Bookmark>,
        session: Option<&Session>,
    ) -> Result<()> {
        if self.state().is_terminal() {
            return Err(EventLogError::InvalidState(format!(
                "cannot subscribe from {:?}",
                self.state()
            )));
        }

        let start = match bookmark {
            Some(b) => SubscribeStart::AfterBookmark(b.token().clone()),
            None => self.fresh_start(),
        };
        let (cursor, start, query_error) = match self.provider.open_subscription(
            channel,
            filter,
            start.clone(),
            session,
            self.cancel.clone(),
        ) {
            Ok(cursor) => (cursor, start, None),
            Err(e) if bookmark.is_some() && e.is_bookmark_rejection() => {
                tracing::warn!(
                    subscription = self.id.0,
                    channel,
                    code = e.code,
                    error = %e.message,
                    "bookmark rejected, subscribing without it"
                );
                let fallback = self.fresh_start();
                let cursor = self.provider.open_subscription(
                    channel,
                    filter,
                    fallback.clone(),
                    session,
                    self.cancel.clone(),
                )?;
                (cursor, fallback, Some(QueryError::new(e.code, e.message)))
            }
            Err(e) => return Err(e.into()),
        };

        let mode = match start {
            SubscribeStart::FutureEvents => DeliveryMode::Tailing,
            SubscribeStart::OldestRecord | SubscribeStart::AfterBookmark(_) => DeliveryMode::Draining,
        };
        tracing::debug!(subscription = self.id.0, channel, filter, ?mode, "subscribed");

        self.current = None;
        if let Some(mut previous) = self.active.take() {
            previous.cursor.release();
        }
        self.position = cursor.position();
        self.active = Some(Active {
            channel: channel.to_string(),
            filter: filter.to_string(),
            cursor,
            mode,
        });
        self.query_error = query_error;
        self.limiter.reset();
        Ok(())
    }

    /// The bookmark rejection recovered from by the last `subscribe()`.
    pub fn query_error(&self) -> Option<&QueryError> {
        self.query_error.as_ref()
    }

    /// Advance to the next event.
    ///
    /// Returns `false` when nothing arrived within the timeout, the rate
    /// limit for the current window is spent or the subscription was
    /// cancelled.
    pub fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(EventLogError::Closed);
        }
        let timeout = self.timeout;
        let cancelled = self.cancel.is_cancelled();
        let active = self.active.as_mut().ok_or(EventLogError::NotSubscribed)?;
        if cancelled {
            return Ok(false);
        }

        let now = Instant::now();
        if self.limiter.is_exceeded(now) {
            tracing::trace!(subscription = self.id.0, limit = self.limiter.limit().value(), "rate limit reached");
            return Ok(false);
        }

        match active.cursor.advance(timeout) {
            Ok(Some(handle)) => {
                self.position = active.cursor.position();
                self.current = Some(handle);
                self.limiter.record(now, 1);
                Ok(true)
            }
            Ok(None) => {
                if active.mode == DeliveryMode::Draining {
                    active.mode = DeliveryMode::Tailing;
                    tracing::debug!(subscription = self.id.0, "backlog drained");
                }
                self.current = None;
                Ok(false)
            }
            Err(e) if matches!(e.kind, ProviderErrorKind::Cancelled | ProviderErrorKind::Timeout) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn render(&self) -> Result<EventRecord> {
        if self.closed {
            return Err(EventLogError::Closed);
        }
        let active = self.active.as_ref().ok_or(EventLogError::NotSubscribed)?;
        let handle = self.current.as_ref().ok_or(EventLogError::NoCurrentEvent)?;
        let raw = active.cursor.materialize(handle, &self.options)?;
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

    /// Iterate currently available events.
    pub fn each(&mut self) -> Records<'_, Self> {
        Records::new(self)
    }

    /// Snapshot of the current position.
    pub fn bookmark(&self) -> Bookmark {
        let mut bookmark = Bookmark::new();
        bookmark.update(self);
        bookmark
    }

    /// Release the last delivered event's provider resource, keeping the
    /// subscription open.
    pub fn close_handle(&mut self) {
        self.current = None;
    }

    pub fn read_existing_events(&self) -> bool {
        self.read_existing_events
    }

    /// Takes effect on the next `subscribe()`.
    pub fn set_read_existing_events(&mut self, value: bool) {
        self.read_existing_events = value;
    }

    pub fn tail(&self) -> bool {
        self.tail
    }

    /// Takes effect on the next `subscribe()`.
    pub fn set_tail(&mut self, value: bool) {
        self.tail = value;
    }

    pub fn rate_limit(&self) -> u32 {
        self.limiter.limit().value()
    }

    pub fn set_rate_limit(&mut self, value: u32) -> Result<()> {
        let limit = self.policy.validate(value)?;
        self.limiter.set_limit(limit);
        Ok(())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Fails if the current rate limit is outside the new policy.
    pub fn set_rate_limit_policy(&mut self, policy: RateLimitPolicy) -> Result<()> {
        policy.check(self.limiter.limit())?;
        self.policy = policy;
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Cancel the active subscription, waking a blocked `next()`.
    ///
    /// Returns false when not subscribed or already cancelled.
    pub fn cancel(&self) -> bool {
        if self.closed || self.active.is_none() {
            return false;
        }
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Release the subscription. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = None;
        if let Some(mut active) = self.active.take() {
            active.cursor.release();
            tracing::debug!(subscription = self.id.0, channel = %active.channel, "closed subscription");
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

impl RecordCursor for Subscribe {
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

impl crate::bookmark::sealed::Sealed for Subscribe {}

impl Positioned for Subscribe {
    fn cursor_id(&self) -> CursorId {
        self.id
    }

    fn position(&self) -> BookmarkToken {
        self.position.clone()
    }
}

impl Drop for Subscribe {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribe")
            .field("id", &self.id)
            .field("channel", &self.channel())
            .field("state", &self.state())
            .field("rate_limit", &self.rate_limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LogProvider, MemoryStore, NewEvent};

    fn provider(count: u16) -> Arc<LogProvider<MemoryStore>> {
        let store = MemoryStore::with_channels(["Application"]);
        for i in 1..=count {
            store.append("Application", NewEvent::new("Test", i)).unwrap();
        }
        Arc::new(LogProvider::new(store))
    }

    #[test]
    fn test_state_machine() {
        let mut sub = Subscribe::new(provider(0));
        assert_eq!(sub.state(), SubscriptionState::Created);
        assert!(!sub.cancel());
        assert!(matches!(sub.next(), Err(EventLogError::NotSubscribed)));

        sub.subscribe("Application", "*", None, None).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Subscribed(DeliveryMode::Tailing));

        assert!(sub.cancel());
        assert!(!sub.cancel());
        assert_eq!(sub.state(), SubscriptionState::Cancelled);
        assert!(!sub.next().unwrap());
        assert!(sub.subscribe("Application", "*", None, None).is_err());

        sub.close();
        sub.close();
        assert_eq!(sub.state(), SubscriptionState::Closed);
    }

    #[test]
    fn test_draining_switches_to_tailing() {
        let mut sub = Subscribe::new(provider(2));
        sub.set_read_existing_events(true);
        sub.subscribe("Application", "*", None, None).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Subscribed(DeliveryMode::Draining));
        assert!(sub.next().unwrap());
        assert!(sub.next().unwrap());
        assert!(!sub.next().unwrap());
        assert_eq!(sub.state(), SubscriptionState::Subscribed(DeliveryMode::Tailing));
    }

    #[test]
    fn test_tail_skips_backlog() {
        let provider = provider(2);
        let mut sub = Subscribe::new(provider.clone());
        sub.set_read_existing_events(true);
        sub.set_tail(true);
        sub.subscribe("Application", "*", None, None).unwrap();
        assert!(!sub.next().unwrap());

        provider.store().append("Application", NewEvent::new("Test", 3)).unwrap();
        assert!(sub.next().unwrap());
        assert_eq!(sub.render().unwrap().record_id, 3);
    }

    #[test]
    fn test_rate_limit_throttles_window() {
        let mut sub = Subscribe::new(provider(30));
        sub.set_read_existing_events(true);
        sub.set_rate_limit(10).unwrap();
        sub.subscribe("Application", "*", None, None).unwrap();

        let mut delivered = 0;
        while sub.next().unwrap() {
            delivered += 1;
            sub.close_handle();
        }
        assert_eq!(delivered, 10);
        assert_eq!(sub.state(), SubscriptionState::Subscribed(DeliveryMode::Draining));
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut sub = Subscribe::new(provider(0));
        assert_eq!(sub.rate_limit(), RATE_INFINITE);
        sub.set_rate_limit(50).unwrap();
        assert!(sub.set_rate_limit(3).is_err());
        assert!(sub.set_rate_limit(33).is_err());
        assert_eq!(sub.rate_limit(), 50);
        sub.set_rate_limit(RATE_INFINITE).unwrap();
        assert_eq!(sub.rate_limit(), RATE_INFINITE);
    }

    #[test]
    fn test_with_config() {
        let config: SubscribeConfig =
            serde_json::from_str(r#"{"read_existing_events": true, "rate_limit": 100}"#).unwrap();
        let sub = Subscribe::with_config(provider(0), config).unwrap();
        assert!(sub.read_existing_events());
        assert!(!sub.tail());
        assert_eq!(sub.rate_limit(), 100);

        let bad = SubscribeConfig {
            rate_limit: 7,
            ..Default::default()
        };
        assert!(Subscribe::with_config(provider(0), bad).is_err());
    }

    #[test]
    fn test_config_carries_rate_limit_policy() {
        let config: SubscribeConfig = serde_json::from_str(
            r#"{"rate_limit": 3, "rate_limit_policy": {"min": 1, "max": 5, "step": 1}}"#,
        )
        .unwrap();
        let mut sub = Subscribe::with_config(provider(0), config).unwrap();
        assert_eq!(sub.rate_limit(), 3);
        assert_eq!(sub.rate_limit_policy().max, 5);
        assert!(sub.set_rate_limit(10).is_err());
    }

    #[test]
    fn test_resubscribe_keeps_previous_on_failure() {
        let mut sub = Subscribe::new(provider(1));
        sub.subscribe("Application", "*", None, None).unwrap();
        let err = sub.subscribe("Missing", "*", None, None).unwrap_err();
        assert!(matches!(err, EventLogError::ChannelNotFound(_)));
        assert_eq!(sub.channel(), Some("Application"));
    }
}
