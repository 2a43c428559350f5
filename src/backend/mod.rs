//! Persistence backends behind one capability.
//!
//! The store only talks to [`Backend`]. Local persistence applies writes
//! before returning ([`Ack::Applied`]); the realtime database acknowledges the
//! request and delivers the resulting state later through [`Backend::changes`]
//! ([`Ack::Pending`]).

mod local;
mod remote;
mod sse;
mod tree;

pub use local::LocalBackend;
pub use remote::{RemoteBackend, RemoteOptions};
#[cfg(test)]
pub use sse::SseParser;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{FlavorRecord, LogPatch, LogRecord, Snapshot};

/// Capacity of the snapshot broadcast channel. Slow receivers skip to the
/// newest snapshot, which is all they need.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Which persistence variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// One field-level mutation of an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    UpdateLog { id: String, patch: LogPatch },
    DeleteLog { id: String },
    RenameFlavor { id: String, name: String },
    DeleteFlavor { id: String },
    /// Point every log whose flavor equals `from` at `to`.
    RetagLogs { from: String, to: String },
}

/// How a backend answered a write.
#[derive(Debug, Clone)]
pub enum Ack {
    /// The write is applied; this is the state right after it.
    Applied(Snapshot),
    /// The write was accepted; the new state arrives through `changes()`.
    Pending,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the live connection is up. Never blocks writes.
    fn is_connected(&self) -> bool;

    /// Latest complete state, or `None` before the first full sync.
    fn snapshot(&self) -> Option<Snapshot>;

    /// Whether an empty flavor list means no catalog was ever created. Backends
    /// that can tell an absent catalog from an emptied one override this.
    fn catalog_absent(&self) -> bool {
        true
    }

    /// Snapshots pushed by the backend outside of a write call.
    fn changes(&self) -> broadcast::Receiver<Snapshot>;

    /// Create a log; the backend assigns the id.
    async fn create_log(&self, record: LogRecord) -> Result<(String, Ack), AppError>;

    /// Create flavors in order; the backend assigns the ids.
    async fn create_flavors(&self, records: Vec<FlavorRecord>) -> Result<Ack, AppError>;

    /// Apply a batch of writes as one logical operation.
    async fn commit(&self, writes: Vec<Write>) -> Result<Ack, AppError>;
}

/// Stand-in used when the configured backend could not be initialised.
/// Permanently disconnected and empty; every write is refused.
pub struct OfflineBackend {
    kind: BackendKind,
    reason: String,
    changes: broadcast::Sender<Snapshot>,
}

impl OfflineBackend {
    pub fn new(kind: BackendKind, reason: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(1);
        Self {
            kind,
            reason: reason.into(),
            changes,
        }
    }

    fn refuse<T>(&self) -> Result<T, AppError> {
        Err(AppError::Unavailable(format!(
            "{} backend unavailable: {}",
            self.kind, self.reason
        )))
    }
}

#[async_trait]
impl Backend for OfflineBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Option<Snapshot> {
        None
    }

    fn changes(&self) -> broadcast::Receiver<Snapshot> {
        self.changes.subscribe()
    }

    async fn create_log(&self, _record: LogRecord) -> Result<(String, Ack), AppError> {
        self.refuse()
    }

    async fn create_flavors(&self, _records: Vec<FlavorRecord>) -> Result<Ack, AppError> {
        self.refuse()
    }

    async fn commit(&self, _writes: Vec<Write>) -> Result<Ack, AppError> {
        self.refuse()
    }
}
