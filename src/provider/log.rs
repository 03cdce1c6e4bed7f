//! Generic provider over an append-only event store.

use super::event::{decode_position, encode_position, StoredEvent};
use super::filter::Filter;
use super::{
    codes, CancelToken, ChannelInfo, EventCursor, EventHandle, EventProvider, ProviderError,
    ProviderErrorKind, ProviderResult, RawEvent, SeekOrigin, SeekRequest, SubscribeStart,
};
use crate::session::Session;
use crate::types::{BookmarkToken, RenderOptions};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Storage backing a [`LogProvider`].
///
/// Record ids are assigned per channel, start at 1 and increase by one on
/// every append.
pub trait EventStore: Send + Sync + 'static {
    fn channels(&self) -> Vec<ChannelInfo>;

    fn contains_channel(&self, channel: &str) -> bool;

    /// Events with `record_id > after`, in record order.
    fn read_after(&self, channel: &str, after: u64) -> ProviderResult<Vec<Arc<StoredEvent>>>;

    /// Highest record id in the channel, 0 if empty.
    fn last_record_id(&self, channel: &str) -> ProviderResult<u64>;

    /// Receiver that becomes ready after each append to `channel`.
    fn watch(&self, channel: &str) -> ProviderResult<Receiver<()>>;
}

/// Append notification fan-out shared by the bundled stores.
#[derive(Default)]
pub(crate) struct Watchers {
    senders: RwLock<HashMap<String, Vec<Sender<()>>>>,
}

impl Watchers {
    pub(crate) fn watch(&self, channel: &str) -> Receiver<()> {
        // One pending wake-up is enough; the cursor rereads everything new.
        let (tx, rx) = bounded(1);
        let mut senders = self.senders.write();
        let list = senders.entry(channel.to_string()).or_default();
        // Prune watchers whose cursor is gone. Live ones see one spare wake-up.
        list.retain(|tx| !matches!(tx.try_send(()), Err(TrySendError::Disconnected(_))));
        list.push(tx);
        rx
    }

    /// Wake all watchers of `channel`, dropping disconnected ones.
    pub(crate) fn notify(&self, channel: &str) {
        let mut senders = self.senders.write();
        if let Some(list) = senders.get_mut(channel) {
            list.retain(|tx| !matches!(tx.try_send(()), Err(TrySendError::Disconnected(_))));
        }
    }

    pub(crate) fn count(&self, channel: &str) -> usize {
        self.senders.read().get(channel).map_or(0, Vec::len)
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Per-record resource behind an [`EventHandle`].
struct Lease {
    event: Arc<StoredEvent>,
    open: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`EventProvider`] over an [`EventStore`].
pub struct LogProvider<S: EventStore> {
    store: Arc<S>,
    reachable_hosts: Vec<String>,
    open_handles: Arc<AtomicUsize>,
    open_cursors: Arc<AtomicUsize>,
}

impl<S: EventStore> LogProvider<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            reachable_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            open_handles: Arc::new(AtomicUsize::new(0)),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hosts a [`Session`] may name. Others fail with an RPC error.
    pub fn with_reachable_hosts<I, T>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.reachable_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Event handles currently held by callers.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Cursors not yet released.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn connect(&self, session: Option<&Session>) -> ProviderResult<()> {
        let server = match session {
            Some(s) if !s.server().is_empty() => s.server(),
            _ => return Ok(()),
        };
        if self
            .reachable_hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(server))
        {
            Ok(())
        } else {
            Err(ProviderError::new(
                ProviderErrorKind::RemoteConnect {
                    server: server.to_string(),
                },
                codes::RPC_SERVER_UNAVAILABLE,
                "The RPC server is unavailable.",
            ))
        }
    }

    fn prepare(&self, channel: &str, filter: &str, session: Option<&Session>) -> ProviderResult<Filter> {
        self.connect(session)?;
        if !self.store.contains_channel(channel) {
            return Err(ProviderError::channel_not_found(channel));
        }
        Filter::parse(filter)
    }

    fn cursor(&self, channel: &str, filter: Filter, mode: Mode, start: Option<u64>, cancel: CancelToken) -> LogCursor<S> {
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        LogCursor {
            store: Arc::clone(&self.store),
            channel: channel.to_string(),
            filter,
            cancel,
            open_handles: Arc::clone(&self.open_handles),
            open_cursors: Arc::clone(&self.open_cursors),
            mode,
            last_delivered: start,
            released: false,
        }
    }
}

impl<S: EventStore> EventProvider for LogProvider<S> {
    fn open_query(
        &self,
        channel: &str,
        filter: &str,
        session: Option<&Session>,
        cancel: CancelToken,
    ) -> ProviderResult<Box<dyn EventCursor>> {
        let filter = self.prepare(channel, filter, session)?;
        let now = now_micros();
        let events: Vec<_> = self
            .store
            .read_after(channel, 0)?
            .into_iter()
            .filter(|e| filter.matches(e, now))
            .collect();
        tracing::trace!(channel, matched = events.len(), "query snapshot");
        let mode = Mode::Snapshot { events, next: 0 };
        Ok(Box::new(self.cursor(channel, filter, mode, None, cancel)))
    }

    fn open_subscription(
        &self,
        channel: &str,
        filter: &str,
        start: SubscribeStart,
        session: Option<&Session>,
        cancel: CancelToken,
    ) -> ProviderResult<Box<dyn EventCursor>> {
        let filter = self.prepare(channel, filter, session)?;
        // Register before reading the watermark so no append is missed.
        let watch = self.store.watch(channel)?;
        let last = self.store.last_record_id(channel)?;
        let watermark = match start {
            SubscribeStart::OldestRecord => 0,
            SubscribeStart::FutureEvents => last,
            SubscribeStart::AfterBookmark(token) => match decode_position(&token)? {
                None => return Err(ProviderError::invalid_bookmark("The bookmark is empty.")),
                Some((bookmarked, _)) if bookmarked != channel => {
                    return Err(ProviderError::invalid_bookmark(format!(
                        "The bookmark belongs to channel {}.",
                        bookmarked
                    )))
                }
                Some((_, id)) if id > last => {
                    return Err(ProviderError::new(
                        ProviderErrorKind::InvalidBookmark,
                        codes::QUERY_RESULT_STALE,
                        "The query result is stale or invalid.",
                    ))
                }
                Some((_, id)) => id,
            },
        };
        let mode = Mode::Live {
            watermark,
            pending: VecDeque::new(),
            watch,
        };
        let start = (watermark > 0).then_some(watermark);
        Ok(Box::new(self.cursor(channel, filter, mode, start, cancel)))
    }

    fn channels(&self) -> ProviderResult<Vec<ChannelInfo>> {
        Ok(self.store.channels())
    }
}

enum Mode {
    /// Matching events captured when the query opened.
    Snapshot {
        events: Vec<Arc<StoredEvent>>,
        next: usize,
    },
    /// Events after `watermark`, read as they arrive.
    Live {
        watermark: u64,
        pending: VecDeque<Arc<StoredEvent>>,
        watch: Receiver<()>,
    },
}

struct LogCursor<S: EventStore> {
    store: Arc<S>,
    channel: String,
    filter: Filter,
    cancel: CancelToken,
    open_handles: Arc<AtomicUsize>,
    open_cursors: Arc<AtomicUsize>,
    mode: Mode,
    last_delivered: Option<u64>,
    released: bool,
}

impl<S: EventStore> LogCursor<S> {
    fn issue(&mut self, event: Arc<StoredEvent>) -> EventHandle {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        self.last_delivered = Some(event.record_id);
        let record_id = event.record_id;
        EventHandle::new(
            record_id,
            Lease {
                event,
                open: Arc::clone(&self.open_handles),
            },
        )
    }

    fn refill(&mut self) -> ProviderResult<()> {
        if let Mode::Live {
            watermark, pending, ..
        } = &mut self.mode
        {
            let now = now_micros();
            for event in self.store.read_after(&self.channel, *watermark)? {
                *watermark = event.record_id;
                if self.filter.matches(&event, now) {
                    pending.push_back(event);
                }
            }
        }
        Ok(())
    }

    fn seek_snapshot(&mut self, request: &SeekRequest) -> ProviderResult<bool> {
        let (events, next) = match &mut self.mode {
            Mode::Snapshot { events, next } => (events, next),
            Mode::Live { .. } => {
                return Err(ProviderError::unsupported(
                    "Seeking is not supported on a subscription.",
                ))
            }
        };
        let len = events.len() as i64;
        let base = match &request.origin {
            SeekOrigin::First => 0,
            SeekOrigin::Last => len - 1,
            // Index of the last delivered event.
            SeekOrigin::Current => *next as i64 - 1,
            SeekOrigin::Bookmark(token) => {
                let record_id = match decode_position(token) {
                    Ok(Some((channel, id))) if channel == self.channel => id,
                    _ => return Ok(false),
                };
                match events.binary_search_by_key(&record_id, |e| e.record_id) {
                    Ok(index) => index as i64,
                    Err(_) if request.strict => return Ok(false),
                    Err(insert_at) => insert_at as i64,
                }
            }
        };
        let target = base.saturating_add(request.offset);
        let target = if request.strict {
            if target < 0 || target >= len {
                return Ok(false);
            }
            target
        } else {
            target.clamp(0, len)
        };
        *next = target as usize;
        self.last_delivered = match target {
            0 => None,
            t => Some(events[t as usize - 1].record_id),
        };
        Ok(true)
    }
}

impl<S: EventStore> EventCursor for LogCursor<S> {
    fn advance(&mut self, timeout: Option<Duration>) -> ProviderResult<Option<EventHandle>> {
        if self.released {
            return Err(ProviderError::released());
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::cancelled());
            }
            let next_event = match &mut self.mode {
                Mode::Snapshot { events, next } => {
                    let event = events.get(*next).cloned();
                    if event.is_some() {
                        *next += 1;
                    }
                    return Ok(event.map(|e| self.issue(e)));
                }
                Mode::Live { pending, .. } => pending.pop_front(),
            };
            if let Some(event) = next_event {
                return Ok(Some(self.issue(event)));
            }
            self.refill()?;
            if let Mode::Live { pending, watch, .. } = &mut self.mode {
                if let Some(event) = pending.pop_front() {
                    return Ok(Some(self.issue(event)));
                }
                let remaining = match deadline {
                    None => return Ok(None),
                    Some(d) => d.saturating_duration_since(Instant::now()),
                };
                if remaining.is_zero() {
                    return Ok(None);
                }
                select! {
                    recv(&*watch) -> msg => {
                        if msg.is_err() {
                            // Store is gone; nothing more will arrive.
                            return Ok(None);
                        }
                    }
                    recv(self.cancel.waker()) -> _ => {}
                    default(remaining) => return Ok(None),
                }
            }
        }
    }

    fn seek(&mut self, request: &SeekRequest, _timeout: Option<Duration>) -> ProviderResult<bool> {
        if self.released {
            return Err(ProviderError::released());
        }
        if self.cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }
        self.seek_snapshot(request)
    }

    fn materialize(&self, handle: &EventHandle, options: &RenderOptions) -> ProviderResult<RawEvent> {
        let lease = handle
            .resource::<Lease>()
            .ok_or_else(ProviderError::released)?;
        let event = &lease.event;
        Ok(RawEvent {
            record_id: event.record_id,
            raw: event.render(options)?,
            template: event.template_for(&options.locale).map(str::to_string),
            inserts: event.inserts.clone(),
        })
    }

    fn position(&self) -> BookmarkToken {
        match self.last_delivered {
            Some(id) => encode_position(&self.channel, id),
            None => BookmarkToken::empty(),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Mode::Snapshot { events, .. } = &mut self.mode {
            events.clear();
        }
        if let Mode::Live { pending, .. } = &mut self.mode {
            pending.clear();
        }
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(channel = %self.channel, "cursor released");
    }
}

impl<S: EventStore> Drop for LogCursor<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryStore, NewEvent};

    fn provider_with(count: u64) -> LogProvider<MemoryStore> {
        let store = MemoryStore::with_channels(["Application"]);
        for i in 1..=count {
            store
                .append("Application", NewEvent::new("Test", i as u16).message("Event %1").insert(i.to_string()))
                .unwrap();
        }
        LogProvider::new(store)
    }

    fn drain(cursor: &mut Box<dyn EventCursor>) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Some(handle) = cursor.advance(None).unwrap() {
            ids.push(handle.record_id());
        }
        ids
    }

    fn seek(origin: SeekOrigin, offset: i64, strict: bool) -> SeekRequest {
        SeekRequest { origin, offset, strict }
    }

    #[test]
    fn test_query_snapshot() {
        let provider = provider_with(3);
        let mut cursor = provider
            .open_query("Application", "*", None, CancelToken::new())
            .unwrap();
        provider
            .store()
            .append("Application", NewEvent::new("Test", 9))
            .unwrap();
        assert_eq!(drain(&mut cursor), vec![1, 2, 3]);
    }

    #[test]
    fn test_open_errors() {
        let provider = provider_with(0);
        let err = provider
            .open_query("Nope", "*", None, CancelToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind, ProviderErrorKind::ChannelNotFound);
        assert_eq!(err.message, "Nope");

        let err = provider
            .open_query("Application", "bogus", None, CancelToken::new())
            .err()
            .unwrap();
        assert_eq!(err.code, codes::INVALID_QUERY);

        let session = Session::new("remote.example.com");
        let err = provider
            .open_query("Application", "*", Some(&session), CancelToken::new())
            .err()
            .unwrap();
        assert_eq!(err.code, codes::RPC_SERVER_UNAVAILABLE);
    }

    #[test]
    fn test_seek_origins() {
        let provider = provider_with(5);
        let mut cursor = provider
            .open_query("Application", "*", None, CancelToken::new())
            .unwrap();

        assert!(cursor.seek(&seek(SeekOrigin::Last, 0, false), None).unwrap());
        assert_eq!(cursor.advance(None).unwrap().unwrap().record_id(), 5);

        assert!(cursor.seek(&seek(SeekOrigin::First, 2, false), None).unwrap());
        assert_eq!(cursor.advance(None).unwrap().unwrap().record_id(), 3);

        assert!(cursor.seek(&seek(SeekOrigin::Current, 0, false), None).unwrap());
        assert_eq!(cursor.advance(None).unwrap().unwrap().record_id(), 3);

        assert!(!cursor.seek(&seek(SeekOrigin::First, 10, true), None).unwrap());
        assert!(cursor.seek(&seek(SeekOrigin::First, 10, false), None).unwrap());
        assert!(cursor.advance(None).unwrap().is_none());
    }

    #[test]
    fn test_seek_bookmark() {
        let provider = provider_with(5);
        let mut cursor = provider
            .open_query("Application", "*[System[EventID != 3]]", None, CancelToken::new())
            .unwrap();

        let token = encode_position("Application", 2);
        assert!(cursor.seek(&seek(SeekOrigin::Bookmark(token), 1, true), None).unwrap());
        assert_eq!(cursor.advance(None).unwrap().unwrap().record_id(), 4);

        // Filtered out: strict fails, lenient moves to the next id.
        let token = encode_position("Application", 3);
        assert!(!cursor.seek(&seek(SeekOrigin::Bookmark(token.clone()), 0, true), None).unwrap());
        assert!(cursor.seek(&seek(SeekOrigin::Bookmark(token), 0, false), None).unwrap());
        assert_eq!(cursor.advance(None).unwrap().unwrap().record_id(), 4);

        let other = encode_position("System", 2);
        assert!(!cursor.seek(&seek(SeekOrigin::Bookmark(other), 0, false), None).unwrap());
    }

    #[test]
    fn test_subscription_starts() {
        let provider = provider_with(3);

        let mut oldest = provider
            .open_subscription("Application", "*", SubscribeStart::OldestRecord, None, CancelToken::new())
            .unwrap();
        assert_eq!(drain(&mut oldest), vec![1, 2, 3]);

        let mut future = provider
            .open_subscription("Application", "*", SubscribeStart::FutureEvents, None, CancelToken::new())
            .unwrap();
        assert_eq!(drain(&mut future), Vec::<u64>::new());

        let token = encode_position("Application", 2);
        let mut after = provider
            .open_subscription("Application", "*", SubscribeStart::AfterBookmark(token), None, CancelToken::new())
            .unwrap();
        assert_eq!(drain(&mut after), vec![3]);

        provider.store().append("Application", NewEvent::new("Test", 4)).unwrap();
        assert_eq!(drain(&mut future), vec![4]);
        assert_eq!(drain(&mut oldest), vec![4]);
    }

    #[test]
    fn test_bookmark_rejections() {
        let provider = provider_with(3);
        for token in [
            BookmarkToken::empty(),
            BookmarkToken::new("not a bookmark"),
            encode_position("System", 1),
            encode_position("Application", 99),
        ] {
            let err = provider
                .open_subscription(
                    "Application",
                    "*",
                    SubscribeStart::AfterBookmark(token),
                    None,
                    CancelToken::new(),
                )
                .err()
                .unwrap();
            assert!(err.is_bookmark_rejection(), "{}", err);
        }
    }

    #[test]
    fn test_wait_wakes_on_append() {
        let provider = Arc::new(provider_with(0));
        let mut cursor = provider
            .open_subscription("Application", "*", SubscribeStart::FutureEvents, None, CancelToken::new())
            .unwrap();

        let writer = Arc::clone(&provider);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.store().append("Application", NewEvent::new("Test", 1)).unwrap();
        });

        let event = cursor.advance(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(event.map(|h| h.record_id()), Some(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_unblocks_wait() {
        let provider = provider_with(0);
        let token = CancelToken::new();
        let mut cursor = provider
            .open_subscription("Application", "*", SubscribeStart::FutureEvents, None, token.clone())
            .unwrap();

        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let err = cursor.advance(Some(Duration::from_secs(30))).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_handles_and_cursors_are_counted() {
        let provider = provider_with(2);
        let mut cursor = provider
            .open_query("Application", "*", None, CancelToken::new())
            .unwrap();
        assert_eq!(provider.open_cursors(), 1);

        let handle = cursor.advance(None).unwrap().unwrap();
        assert_eq!(provider.open_handles(), 1);
        let raw = cursor.materialize(&handle, &RenderOptions::default()).unwrap();
        assert_eq!(raw.template.as_deref(), Some("Event %1"));
        assert_eq!(raw.inserts, vec!["1".to_string()]);
        drop(handle);
        assert_eq!(provider.open_handles(), 0);

        cursor.release();
        cursor.release();
        assert_eq!(provider.open_cursors(), 0);
        assert!(cursor.advance(None).is_err());
        drop(cursor);
        assert_eq!(provider.open_cursors(), 0);
    }

    #[test]
    fn test_position_tracks_delivery() {
        let provider = provider_with(2);
        let mut cursor = provider
            .open_query("Application", "*", None, CancelToken::new())
            .unwrap();
        assert!(cursor.position().is_empty());
        cursor.advance(None).unwrap();
        assert_eq!(decode_position(&cursor.position()).unwrap(), Some(("Application".to_string(), 1)));
    }
}
