//! On-disk event store.
//!
//! Layout under the journal directory:
//!
//! - `channels.json` lists the channels and the file holding each one
//! - `NNNN.evj` holds one channel's events as checksummed frames
//!
//! A channel file starts with a 4-byte magic and a version byte, followed by
//! frames of `len: u32 LE | MessagePack event | crc32: u32 LE`. A frame cut
//! short at the end of the file (a torn write) is dropped on open.

use super::event::{NewEvent, StoredEvent};
use super::log::{EventStore, Watchers};
use super::{ChannelInfo, ChannelKind, ProviderError, ProviderResult};
use crate::error::{EventLogError, Result};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const JOURNAL_MAGIC: &[u8; 4] = b"EVJ\0";
const JOURNAL_VERSION: u8 = 1;
const HEADER_LEN: usize = 5;
const MANIFEST: &str = "channels.json";
const MAX_FRAME: usize = 64 * 1024 * 1024;

/// Journal configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the journal.
    pub path: PathBuf,
    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
    /// fsync after this many appends per channel (0 = every append).
    pub sync_interval: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./journal"),
            create_if_missing: true,
            sync_interval: 100,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestEntry {
    info: ChannelInfo,
    file: String,
}

struct ChannelFile {
    info: ChannelInfo,
    file_name: String,
    writer: File,
    events: Vec<Arc<StoredEvent>>,
    writes_since_sync: u64,
    poisoned: bool,
}

/// Append target that can be rolled back after a failed write.
trait FrameSink: Write {
    /// Current length, where the next frame starts.
    fn end(&self) -> io::Result<u64>;

    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl FrameSink for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// `len: u32 LE | MessagePack event | crc32: u32 LE`
fn encode_frame(event: &StoredEvent) -> Result<Vec<u8>> {
    let encoded = rmp_serde::to_vec(event)?;
    let mut frame = Vec::with_capacity(encoded.len() + 8);
    frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    frame.extend_from_slice(&encoded);
    frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
    Ok(frame)
}

/// Write `frame` at `start`, cutting the sink back to `start` on failure.
fn append_frame<W: FrameSink>(sink: &mut W, start: u64, frame: &[u8], sync: bool) -> io::Result<()> {
    let written = sink
        .write_all(frame)
        .and_then(|()| if sync { sink.sync() } else { Ok(()) });
    if let Err(e) = written {
        let _ = sink.truncate(start);
        return Err(e);
    }
    Ok(())
}

/// Event store persisted to a directory of channel files.
pub struct JournalStore {
    config: JournalConfig,
    channels: RwLock<BTreeMap<String, ChannelFile>>,
    watchers: Watchers,
}

impl JournalStore {
    /// Open a journal, loading every channel into the read cache.
    pub fn open(config: JournalConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(EventLogError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("journal not found: {}", config.path.display()),
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let mut channels = BTreeMap::new();
        let manifest = config.path.join(MANIFEST);
        if manifest.exists() {
            let entries: Vec<ManifestEntry> = serde_json::from_slice(&fs::read(&manifest)?)?;
            for entry in entries {
                let path = config.path.join(&entry.file);
                let events = load_channel(&path, &entry.info.name)?;
                let writer = OpenOptions::new().append(true).open(&path)?;
                tracing::debug!(channel = %entry.info.name, events = events.len(), "loaded journal channel");
                channels.insert(
                    entry.info.name.clone(),
                    ChannelFile {
                        info: entry.info,
                        file_name: entry.file,
                        writer,
                        events,
                        writes_since_sync: 0,
                        poisoned: false,
                    },
                );
            }
        }

        Ok(Self {
            config,
            channels: RwLock::new(channels),
            watchers: Watchers::default(),
        })
    }

    /// Open with the default configuration at `path`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(JournalConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns false if the channel already exists.
    pub fn create_channel(&self, name: impl Into<String>, kind: ChannelKind) -> Result<bool> {
        let name = name.into();
        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            return Ok(false);
        }

        let file_name = format!("{:04}.evj", channels.len());
        let path = self.config.path.join(&file_name);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        let writer = OpenOptions::new().append(true).open(&path)?;

        channels.insert(
            name.clone(),
            ChannelFile {
                info: ChannelInfo::new(name, kind),
                file_name,
                writer,
                events: Vec::new(),
                writes_since_sync: 0,
                poisoned: false,
            },
        );
        self.write_manifest(&channels)?;
        Ok(true)
    }

    /// Append an event and return its record id.
    ///
    /// A failed write is rolled back so the file never keeps a partial
    /// frame. If the rollback itself fails the channel refuses further
    /// appends until the journal is reopened.
    pub fn append(&self, channel: &str, event: NewEvent) -> Result<u64> {
        let record_id = {
            let mut channels = self.channels.write();
            let log = channels
                .get_mut(channel)
                .ok_or_else(|| ProviderError::channel_not_found(channel))?;
            if log.poisoned {
                return Err(EventLogError::Corruption(format!(
                    "channel {} holds a partial write; reopen the journal",
                    channel
                )));
            }

            let record_id = log.events.len() as u64 + 1;
            let stored = StoredEvent::from_new(record_id, channel, event);
            let frame = encode_frame(&stored)?;

            let sync_now = log.writes_since_sync + 1 >= self.config.sync_interval.max(1);
            let start = log.writer.end()?;
            if let Err(e) = append_frame(&mut log.writer, start, &frame, sync_now) {
                if log.writer.end().map_or(true, |len| len != start) {
                    log.poisoned = true;
                    tracing::warn!(channel, offset = start, "partial frame left behind, channel poisoned");
                }
                return Err(e.into());
            }
            log.writes_since_sync = if sync_now { 0 } else { log.writes_since_sync + 1 };

            log.events.push(Arc::new(stored));
            record_id
        };
        self.watchers.notify(channel);
        Ok(record_id)
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        let mut channels = self.channels.write();
        for log in channels.values_mut() {
            log.writer.sync_data()?;
            log.writes_since_sync = 0;
        }
        Ok(())
    }

    fn write_manifest(&self, channels: &BTreeMap<String, ChannelFile>) -> Result<()> {
        let entries: Vec<ManifestEntry> = channels
            .values()
            .map(|c| ManifestEntry {
                info: c.info.clone(),
                file: c.file_name.clone(),
            })
            .collect();
        let tmp = self.config.path.join(format!("{}.tmp", MANIFEST));
        fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        fs::rename(&tmp, self.config.path.join(MANIFEST))?;
        Ok(())
    }
}

/// Read a channel file, truncating a torn final frame.
fn load_channel(path: &Path, channel: &str) -> Result<Vec<Arc<StoredEvent>>> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_LEN || &bytes[..4] != JOURNAL_MAGIC {
        return Err(EventLogError::Corruption(format!(
            "invalid journal header: {}",
            path.display()
        )));
    }
    if bytes[4] != JOURNAL_VERSION {
        return Err(EventLogError::Corruption(format!(
            "unsupported journal version: {}",
            bytes[4]
        )));
    }

    let mut events = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < bytes.len() {
        match read_frame(&bytes, offset)? {
            Some((stored, next)) => {
                let expected = events.len() as u64 + 1;
                if stored.record_id != expected || stored.channel != channel {
                    return Err(EventLogError::Corruption(format!(
                        "unexpected record {} in {} (expected {})",
                        stored.record_id, channel, expected
                    )));
                }
                events.push(Arc::new(stored));
                offset = next;
            }
            None => {
                tracing::warn!(
                    channel,
                    dropped = bytes.len() - offset,
                    "discarding torn journal tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(offset as u64)?;
                file.sync_all()?;
                break;
            }
        }
    }
    Ok(events)
}

/// Decode the frame at `offset`. `None` means the file ends in a torn frame.
///
/// A frame is only torn when it is the last thing in the file: its declared
/// end is past EOF and no intact frame follows it. Anything else is
/// corruption and must not be truncated away.
fn read_frame(bytes: &[u8], offset: usize) -> Result<Option<(StoredEvent, usize)>> {
    let rest = &bytes[offset..];
    if rest.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    if len > MAX_FRAME {
        return Err(EventLogError::Corruption(format!(
            "frame length {} at offset {} exceeds limit",
            len, offset
        )));
    }
    let end = 4 + len + 4;
    if rest.len() < end {
        if contains_frame(&rest[1..]) {
            return Err(EventLogError::Corruption(format!(
                "frame at offset {} overruns the records after it",
                offset
            )));
        }
        return Ok(None);
    }
    let encoded = &rest[4..4 + len];
    let stored_crc = u32::from_le_bytes([rest[4 + len], rest[5 + len], rest[6 + len], rest[7 + len]]);
    let computed = crc32fast::hash(encoded);
    if stored_crc != computed {
        // Only the final frame may be a partial write.
        if rest.len() == end {
            return Ok(None);
        }
        return Err(EventLogError::ChecksumMismatch {
            expected: stored_crc,
            got: computed,
        });
    }
    let event: StoredEvent = rmp_serde::from_slice(encoded)?;
    Ok(Some((event, offset + end)))
}

/// Whether an intact, non-empty frame starts anywhere in `bytes`.
fn contains_frame(bytes: &[u8]) -> bool {
    (0..bytes.len().saturating_sub(8)).any(|start| {
        let rest = &bytes[start..];
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if len == 0 || len > MAX_FRAME || rest.len() < 4 + len + 4 {
            return false;
        }
        let stored_crc = u32::from_le_bytes([rest[4 + len], rest[5 + len], rest[6 + len], rest[7 + len]]);
        crc32fast::hash(&rest[4..4 + len]) == stored_crc
    })
}

impl EventStore for JournalStore {
    fn channels(&self) -> Vec<ChannelInfo> {
        self.channels
            .read()
            .values()
            .map(|c| c.info.clone())
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
