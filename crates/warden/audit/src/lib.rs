//! Tamper-evident governance audit log.
//!
//! Every state-affecting governance event is sealed into a SHA-256 hash chain
//! with a strictly increasing sequence number. Stores expose append and read
//! operations only.

pub mod error;
pub mod event;
pub mod integrity;
pub mod query;
pub mod store;

pub use error::{AuditError, Result};
pub use event::{ActorType, AuditActor, AuditEvent, AuditEventBuilder, AuditEventType, PendingAuditEvent};
pub use integrity::{ChainVerification, IntegrityChain, IntegrityVerifier};
pub use query::{AuditPage, AuditQuery, AuditQueryBuilder, DEFAULT_LIMIT, MAX_LIMIT};
pub use store::{AuditStore, FileAuditStore, MemoryAuditStore};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Audit log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: AuditBackend,
}

/// Audit storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuditBackend {
    /// In-memory (lost on restart)
    #[default]
    Memory,

    /// Append-only JSONL file
    File { path: PathBuf },
}

/// Open the store described by `config`
pub async fn open_store(config: &AuditConfig) -> Result<Arc<dyn AuditStore>> {
    match &config.backend {
        AuditBackend::Memory => Ok(Arc::new(MemoryAuditStore::new())),
        AuditBackend::File { path } => Ok(Arc::new(FileAuditStore::open(path.clone()).await?)),
    }
}
