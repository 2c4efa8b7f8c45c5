//! Audit stores.
//!
//! The [`AuditStore`] trait is the whole public contract of the audit log:
//! append, read, count and verify. There is no update or delete primitive;
//! an event cannot be altered once it has a sequence number.

use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, PendingAuditEvent};
use crate::integrity::{ChainVerification, IntegrityChain, IntegrityVerifier};
use crate::query::{AuditPage, AuditQuery};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only audit log storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Seal and append events as one unit: either every event is recorded,
    /// with contiguous sequence numbers, or none is
    async fn append_batch(&self, events: Vec<PendingAuditEvent>) -> Result<Vec<AuditEvent>>;

    /// Seal and append an event, returning it with its sequence number
    async fn append(&self, event: PendingAuditEvent) -> Result<AuditEvent> {
        self.append_batch(vec![event])
            .await?
            .pop()
            .ok_or_else(|| AuditError::WriteFailed("store returned no event".to_string()))
    }

    /// Read events matching a query
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage>;

    /// Number of recorded events
    async fn len(&self) -> Result<u64>;

    /// Hash of the newest event, `None` while empty
    async fn head_hash(&self) -> Result<Option<String>>;

    /// Verify the whole stored chain
    async fn verify(&self) -> Result<ChainVerification>;
}

/// Seal `batch` against a copy of `chain`. The caller commits the copy only
/// once the events are stored.
fn seal(chain: &IntegrityChain, batch: Vec<PendingAuditEvent>) -> (IntegrityChain, Vec<AuditEvent>) {
    let mut chain = chain.clone();
    let sealed = batch
        .into_iter()
        .map(|pending| {
            let event = pending.finalize(chain.next_seq(), chain.previous_hash());
            chain.update(&event);
            event
        })
        .collect();
    (chain, sealed)
}

/// In-memory audit store
#[derive(Default)]
pub struct MemoryAuditStore {
    inner: RwLock<MemoryLog>,
}

#[derive(Default)]
struct MemoryLog {
    events: Vec<AuditEvent>,
    chain: IntegrityChain,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.read().events.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append_batch(&self, batch: Vec<PendingAuditEvent>) -> Result<Vec<AuditEvent>> {
        let mut log = self.inner.write();
        let (chain, sealed) = seal(&log.chain, batch);
        log.chain = chain;
        log.events.extend(sealed.iter().cloned());
        Ok(sealed)
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        query.validate()?;
        Ok(query.apply(&self.inner.read().events))
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.inner.read().chain.last_seq())
    }

    async fn head_hash(&self) -> Result<Option<String>> {
        Ok(self.inner.read().chain.previous_hash())
    }

    async fn verify(&self) -> Result<ChainVerification> {
        Ok(IntegrityVerifier::verify_chain(&self.inner.read().events))
    }
}

/// JSONL file store with append-only writes.
///
/// A batch is written and synced before it becomes visible to readers or
/// advances the chain. A failed write is cut back off the file; if that is
/// impossible the store refuses every later append. Reopening an existing
/// file drops a torn final line, replays the rest and continues the sequence.
pub struct FileAuditStore {
    path: PathBuf,
    writer: Mutex<FileWriter>,
    events: RwLock<Vec<AuditEvent>>,
}

struct FileWriter {
    file: File,
    chain: IntegrityChain,
    /// File length covering complete, acknowledged events only
    committed_len: u64,
    poisoned: bool,
}

impl FileWriter {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.committed_len += bytes.len() as u64;
        Ok(())
    }

    /// Truncate whatever part of a failed write reached the file
    async fn rollback(&mut self) {
        let result = async {
            self.file.set_len(self.committed_len).await?;
            self.file.sync_data().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Could not roll back partial audit write; refusing further appends");
            self.poisoned = true;
        }
    }
}

impl FileAuditStore {
    /// Open or create the log at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let (events, committed_len) = if path.exists() {
            Self::load_events(&path).await?
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            (Vec::new(), 0)
        };

        let verification = IntegrityVerifier::verify_chain(&events);
        if !verification.valid {
            return Err(AuditError::Corrupted {
                seq: verification.first_invalid_seq.unwrap_or(0),
                reason: verification.error_message.unwrap_or_default(),
            });
        }

        let chain = match events.last() {
            Some(last) => IntegrityChain::from_state(Some(last.event_hash.clone()), last.seq),
            None => IntegrityChain::new(),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let on_disk = file.metadata().await?.len();
        if on_disk > committed_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - committed_len,
                "Dropping torn final line of audit log"
            );
            file.set_len(committed_len).await?;
            file.sync_data().await?;
        }

        tracing::debug!(path = %path.display(), events = events.len(), "Opened audit log");

        Ok(Self {
            path,
            writer: Mutex::new(FileWriter {
                file,
                chain,
                committed_len,
                poisoned: false,
            }),
            events: RwLock::new(events),
        })
    }

    /// Parse every newline-terminated event and return them with the byte
    /// length they cover. Bytes after the last newline are a torn write.
    async fn load_events(path: &Path) -> Result<(Vec<AuditEvent>, u64)> {
        let contents = tokio::fs::read(path).await?;
        let complete = contents.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);

        let mut events = Vec::new();
        for line in contents[..complete].split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            events.push(serde_json::from_slice(line)?);
        }

        Ok((events, complete as u64))
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append_batch(&self, batch: Vec<PendingAuditEvent>) -> Result<Vec<AuditEvent>> {
        let mut writer = self.writer.lock().await;
        if writer.poisoned {
            return Err(AuditError::WriteFailed(
                "audit log is unwritable after a failed rollback".to_string(),
            ));
        }

        let (chain, sealed) = seal(&writer.chain, batch);
        if sealed.is_empty() {
            return Ok(sealed);
        }

        let mut bytes = Vec::new();
        for event in &sealed {
            serde_json::to_writer(&mut bytes, event)?;
            bytes.push(b'\n');
        }

        if let Err(e) = writer.write(&bytes).await {
            writer.rollback().await;
            return Err(AuditError::WriteFailed(e.to_string()));
        }

        writer.chain = chain;
        self.events.write().extend(sealed.iter().cloned());

        Ok(sealed)
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        query.validate()?;
        Ok(query.apply(&self.events.read()))
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.events.read().len() as u64)
    }

    async fn head_hash(&self) -> Result<Option<String>> {
        Ok(self.events.read().last().map(|e| e.event_hash.clone()))
    }

    async fn verify(&self) -> Result<ChainVerification> {
        let (events, _) = Self::load_events(&self.path).await?;
        Ok(IntegrityVerifier::verify_chain(&events))
    }
}
