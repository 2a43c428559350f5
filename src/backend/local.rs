//! Local persistence: both collections live as JSON arrays in the key-value
//! store and every write is applied before the call returns.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::{Ack, Backend, BackendKind, Write, CHANGE_CHANNEL_CAPACITY};
use crate::db::{KvStore, FLAVORS_KEY, LOGS_KEY};
use crate::errors::AppError;
use crate::models::{Flavor, FlavorRecord, LogEntry, LogRecord, Snapshot};

#[derive(Debug, Clone, Default)]
struct Collections {
    version: u64,
    logs: Vec<LogEntry>,
    flavors: Vec<Flavor>,
}

impl Collections {
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.version, self.logs.clone(), self.flavors.clone())
    }
}

/// Which documents a batch touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Touched {
    logs: bool,
    flavors: bool,
}

/// Key-value backed persistence.
pub struct LocalBackend {
    kv: KvStore,
    // Held across read-modify-write so concurrent writers serialise.
    state: Mutex<Collections>,
    current: RwLock<Snapshot>,
    changes: broadcast::Sender<Snapshot>,
    // The flavor document did not exist when the store was opened.
    catalog_absent: bool,
}

impl LocalBackend {
    /// Load both documents. Missing documents start empty; undecodable ones
    /// fail the open rather than being overwritten later.
    pub async fn open(kv: KvStore) -> Result<Self, AppError> {
        let logs: Vec<LogEntry> = kv.get_json(LOGS_KEY).await?.unwrap_or_default();
        let stored: Option<Vec<Flavor>> = kv.get_json(FLAVORS_KEY).await?;
        let catalog_absent = stored.is_none();
        let flavors = stored.unwrap_or_default();
        tracing::info!(
            "Local store loaded: {} logs, {} flavors",
            logs.len(),
            flavors.len()
        );

        let collections = Collections {
            version: 1,
            logs,
            flavors,
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            kv,
            current: RwLock::new(collections.snapshot()),
            state: Mutex::new(collections),
            changes,
            catalog_absent,
        })
    }

    /// Persist `next` for the touched documents, then make it current.
    async fn persist(
        &self,
        state: &mut Collections,
        mut next: Collections,
        touched: Touched,
    ) -> Result<Snapshot, AppError> {
        let mut entries: Vec<(&str, Value)> = Vec::with_capacity(2);
        if touched.logs {
            entries.push((LOGS_KEY, serde_json::to_value(&next.logs)?));
        }
        if touched.flavors {
            entries.push((FLAVORS_KEY, serde_json::to_value(&next.flavors)?));
        }
        self.kv.put_json(&entries).await?;

        next.version = state.version + 1;
        *state = next;
        let snapshot = state.snapshot();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
        Ok(snapshot)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn snapshot(&self) -> Option<Snapshot> {
        Some(
            self.current
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        )
    }

    fn catalog_absent(&self) -> bool {
        self.catalog_absent
    }

    fn changes(&self) -> broadcast::Receiver<Snapshot> {
        self.changes.subscribe()
    }

    async fn create_log(&self, record: LogRecord) -> Result<(String, Ack), AppError> {
        let id = new_id();
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.logs.insert(0, record.into_entry(id.clone()));

        let touched = Touched {
            logs: true,
            flavors: false,
        };
        let snapshot = self.persist(&mut state, next, touched).await?;
        Ok((id, Ack::Applied(snapshot)))
    }

    async fn create_flavors(&self, records: Vec<FlavorRecord>) -> Result<Ack, AppError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.flavors
            .extend(records.into_iter().map(|record| record.into_flavor(new_id())));

        let touched = Touched {
            logs: false,
            flavors: true,
        };
        let snapshot = self.persist(&mut state, next, touched).await?;
        Ok(Ack::Applied(snapshot))
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<Ack, AppError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let touched = apply_writes(&mut next, &writes);

        let snapshot = self.persist(&mut state, next, touched).await?;
        Ok(Ack::Applied(snapshot))
    }
}

fn apply_writes(collections: &mut Collections, writes: &[Write]) -> Touched {
    let mut touched = Touched::default();
    for write in writes {
        match write {
            Write::UpdateLog { id, patch } => {
                if let Some(entry) = collections.logs.iter_mut().find(|l| &l.id == id) {
                    entry.apply(patch);
                }
                touched.logs = true;
            }
            Write::DeleteLog { id } => {
                collections.logs.retain(|l| &l.id != id);
                touched.logs = true;
            }
            Write::RenameFlavor { id, name } => {
                if let Some(flavor) = collections.flavors.iter_mut().find(|f| &f.id == id) {
                    flavor.name = name.clone();
                }
                touched.flavors = true;
            }
            Write::DeleteFlavor { id } => {
                collections.flavors.retain(|f| &f.id != id);
                touched.flavors = true;
            }
            Write::RetagLogs { from, to } => {
                for entry in collections.logs.iter_mut().filter(|l| &l.flavor == from) {
                    entry.flavor = to.clone();
                }
                touched.logs = true;
            }
        }
    }
    touched
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
