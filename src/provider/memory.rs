//! In-process event store.

use super::event::{NewEvent, StoredEvent};
use super::log::{EventStore, Watchers};
use super::{ChannelInfo, ChannelKind, ProviderError, ProviderResult};
use crate::error::Result;
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

struct ChannelLog {
    info: ChannelInfo,
    events: Vec<Arc<StoredEvent>>,
}

/// Event store held entirely in memory.
///
/// Appends wake every subscription watching the channel.
#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<String, ChannelLog>>,
    watchers: Watchers,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given admin channels.
    pub fn with_channels<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let store = Self::new();
        for name in names {
            store.create_channel(name, ChannelKind::Admin);
        }
        store
    }

    /// Returns false if the channel already exists.
    pub fn create_channel(&self, name: impl Into<String>, kind: ChannelKind) -> bool {
        let name = name.into();
        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            return false;
        }
        channels.insert(
            name.clone(),
            ChannelLog {
                info: ChannelInfo::new(name, kind),
                events: Vec::new(),
            },
        );
        true
    }

    /// Append an event and return its record id.
    pub fn append(&self, channel: &str, event: NewEvent) -> Result<u64> {
        let record_id = {
            let mut channels = self.channels.write();
            let log = channels
                .get_mut(channel)
                .ok_or_else(|| ProviderError::channel_not_found(channel))?;
            let record_id = log.events.len() as u64 + 1;
            log.events
                .push(Arc::new(StoredEvent::from_new(record_id, channel, event)));
            record_id
        };
        self.watchers.notify(channel);
        tracing::trace!(channel, record_id, "appended event");
        Ok(record_id)
    }

    pub fn len(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, |log| log.events.len())
    }

    pub fn is_empty(&self, channel: &str) -> bool {
        self.len(channel) == 0
    }

    /// Live watch registrations for `channel`.
    pub fn watcher_count(&self, channel: &str) -> usize {
        self.watchers.count(channel)
    }
}

impl EventStore for MemoryStore {
    fn channels(&self) -> Vec<ChannelInfo> {
        self.channels
            .read()
            .values()
            .map(|log| log.info.clone())
            .collect()
    }

    fn contains_channel(&self, channel: &str) -> bool {
        self.channels.read().contains_key(channel)
    }

    fn read_after(&self, channel: &str, after: u64) -> ProviderResult<Vec<Arc<StoredEvent>>> {
        let channels = self.channels.read();
        let log = channels
            .get(channel)
            .ok_or_else(|| ProviderError::channel_not_found(channel))?;
        let start = (after as usize).min(log.events.len());
        Ok(log.events[start..].to_vec())
    }

    fn last_record_id(&self, channel: &str) -> ProviderResult<u64> {
        let channels = self.channels.read();
        let log = channels
            .get(channel)
            .ok_or_else(|| ProviderError::channel_not_found(channel))?;
        Ok(log.events.len() as u64)
    }

    fn watch(&self, channel: &str) -> ProviderResult<Receiver<()>> {
        if !self.contains_channel(channel) {
            return Err(ProviderError::channel_not_found(channel));
        }
        Ok(self.watchers.watch(channel))
    }
}
