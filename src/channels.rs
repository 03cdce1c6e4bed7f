//! Channel enumeration.

use crate::error::Result;
use crate::provider::{ChannelInfo, EventProvider};
use std::sync::Arc;

/// Lists the channels a provider exposes.
///
/// Analytic and debug channels cannot be subscribed to and are skipped
/// unless `force_enumerate` is set.
pub struct Channels {
    provider: Arc<dyn EventProvider>,
    force_enumerate: bool,
}

impl Channels {
    pub fn new(provider: Arc<dyn EventProvider>) -> Self {
        Self {
            provider,
            force_enumerate: false,
        }
    }

    pub fn force_enumerate(&self) -> bool {
        self.force_enumerate
    }

    pub fn set_force_enumerate(&mut self, value: bool) {
        self.force_enumerate = value;
    }

    /// Channel entries, filtered unless enumeration is forced.
    pub fn entries(&self) -> Result<Vec<ChannelInfo>> {
        let force = self.force_enumerate;
        let entries = self
            .provider
            .channels()?
            .into_iter()
            .filter(|c| force || c.kind.is_subscribable())
            .collect();
        Ok(entries)
    }

    /// Channel names, filtered unless enumeration is forced.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|c| c.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChannelKind, LogProvider, MemoryStore};

    #[test]
    fn test_forced_enumeration() {
        let store = MemoryStore::new();
        store.create_channel("Application", ChannelKind::Admin);
        store.create_channel("Microsoft-Windows-Sysmon/Operational", ChannelKind::Operational);
        store.create_channel("Microsoft-Windows-Kernel/Analytic", ChannelKind::Analytic);
        store.create_channel("Microsoft-Windows-Kernel/Debug", ChannelKind::Debug);

        let mut channels = Channels::new(Arc::new(LogProvider::new(store)));
        assert_eq!(
            channels.list().unwrap(),
            vec!["Application", "Microsoft-Windows-Sysmon/Operational"]
        );

        channels.set_force_enumerate(true);
        assert_eq!(channels.list().unwrap().len(), 4);
    }
}
