//! The store: sole owner of the log and flavor collections.
//!
//! Every mutation goes through the configured [`Backend`]. The store keeps
//! the newest snapshot the backend has reported and notifies subscribers each
//! time a newer one is installed. Reads never touch the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;

use crate::backend::{Ack, Backend, BackendKind, Write};
use crate::errors::AppError;
use crate::models::{
    default_flavor_records, Flavor, FlavorRecord, LogEntry, LogPatch, LogRecord, Snapshot,
};
use crate::notifier::{ChangeNotifier, Subscription};

pub struct Store {
    backend: Arc<dyn Backend>,
    snapshot: RwLock<Snapshot>,
    notifier: ChangeNotifier,
    seed_checked: AtomicBool,
}

impl Store {
    /// Wrap `backend`, take its current state if it has one, and follow its
    /// change stream for as long as the store lives.
    pub async fn open(backend: Arc<dyn Backend>) -> Arc<Self> {
        let store = Arc::new(Self {
            backend,
            snapshot: RwLock::new(Snapshot::default()),
            notifier: ChangeNotifier::new(),
            seed_checked: AtomicBool::new(false),
        });

        // Subscribe before reading the current state so nothing falls between.
        spawn_sync_listener(&store);
        if let Some(snapshot) = store.backend.snapshot() {
            store.absorb(snapshot).await;
        }
        store
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Version of the installed snapshot; 0 before the first one.
    pub fn revision(&self) -> u64 {
        self.current().version
    }

    /// The installed snapshot. Both collections come from the same instant.
    pub fn current(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn list_logs(&self) -> Arc<Vec<LogEntry>> {
        self.current().logs
    }

    pub fn list_flavors(&self) -> Arc<Vec<Flavor>> {
        self.current().flavors
    }

    /// Run `callback` after every installed snapshot.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }

    pub async fn add_log(&self, flavor: &str, timestamp: DateTime<Utc>) -> Result<String, AppError> {
        self.add_log_with_notes(flavor, timestamp, None).await
    }

    pub async fn add_log_with_notes(
        &self,
        flavor: &str,
        timestamp: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<String, AppError> {
        let record = LogRecord {
            flavor: flavor.to_string(),
            timestamp,
            notes,
        };
        let (id, ack) = self.backend.create_log(record).await?;
        tracing::debug!("Logged {} as {}", flavor, id);
        self.settle(ack).await;
        Ok(id)
    }

    /// Merge `patch` into the log `id`. Returns `false` without writing when
    /// the log is not in the current snapshot.
    pub async fn update_log(&self, id: &str, patch: LogPatch) -> Result<bool, AppError> {
        if !self.current().logs.iter().any(|l| l.id == id) {
            tracing::debug!("Update of unknown log {} ignored", id);
            return Ok(false);
        }
        if patch.is_empty() {
            return Ok(true);
        }

        let ack = self
            .backend
            .commit(vec![Write::UpdateLog {
                id: id.to_string(),
                patch,
            }])
            .await?;
        self.settle(ack).await;
        Ok(true)
    }

    pub async fn delete_log(&self, id: &str) -> Result<(), AppError> {
        let ack = self
            .backend
            .commit(vec![Write::DeleteLog { id: id.to_string() }])
            .await?;
        self.settle(ack).await;
        Ok(())
    }

    /// Add a custom flavor. Returns `false` without writing when a flavor of
    /// the same name, ignoring case, already exists.
    pub async fn add_flavor(&self, name: &str) -> Result<bool, AppError> {
        if self.current().flavors.iter().any(|f| f.same_name(name)) {
            tracing::debug!("Flavor {:?} already exists", name);
            return Ok(false);
        }

        let ack = self
            .backend
            .create_flavors(vec![FlavorRecord::custom(name)])
            .await?;
        self.settle(ack).await;
        Ok(true)
    }

    /// Rename a flavor and move every log carrying the old name to the new
    /// one, as a single batch. Returns `false` when the flavor is unknown.
    pub async fn update_flavor(&self, id: &str, new_name: &str) -> Result<bool, AppError> {
        let snapshot = self.current();
        let Some(flavor) = snapshot.flavors.iter().find(|f| f.id == id) else {
            tracing::debug!("Rename of unknown flavor {} ignored", id);
            return Ok(false);
        };

        let mut writes = vec![Write::RenameFlavor {
            id: id.to_string(),
            name: new_name.to_string(),
        }];
        if flavor.name != new_name {
            tracing::info!("Renaming flavor {:?} to {:?}", flavor.name, new_name);
            writes.push(Write::RetagLogs {
                from: flavor.name.clone(),
                to: new_name.to_string(),
            });
        }

        let ack = self.backend.commit(writes).await?;
        self.settle(ack).await;
        Ok(true)
    }

    /// Remove a flavor. Logs keep whatever name they carry.
    pub async fn delete_flavor(&self, id: &str) -> Result<(), AppError> {
        let ack = self
            .backend
            .commit(vec![Write::DeleteFlavor { id: id.to_string() }])
            .await?;
        self.settle(ack).await;
        Ok(())
    }

    async fn settle(&self, ack: Ack) {
        if let Ack::Applied(snapshot) = ack {
            self.absorb(snapshot).await;
        }
    }

    /// Install `snapshot` and seed the defaults if it is the first one and
    /// the backend has no catalog yet.
    async fn absorb(&self, snapshot: Snapshot) {
        if self.install(snapshot) {
            self.seed_defaults().await;
        }
    }

    /// Replace the snapshot unless `snapshot` is not newer. Returns whether
    /// the default flavors are due.
    fn install(&self, snapshot: Snapshot) -> bool {
        let needs_seed = snapshot.flavors.is_empty() && self.backend.catalog_absent();
        {
            let mut current = self
                .snapshot
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if snapshot.version <= current.version {
                tracing::trace!(
                    "Skipping snapshot {} (holding {})",
                    snapshot.version,
                    current.version
                );
                return false;
            }
            *current = snapshot;
        }

        self.notifier.notify();
        !self.seed_checked.swap(true, Ordering::SeqCst) && needs_seed
    }

    async fn seed_defaults(&self) {
        let records = default_flavor_records();
        tracing::info!("Flavor catalog is empty, seeding {} defaults", records.len());
        match self.backend.create_flavors(records).await {
            Ok(Ack::Applied(snapshot)) => {
                self.install(snapshot);
            }
            Ok(Ack::Pending) => {}
            Err(e) => tracing::warn!("Failed to seed default flavors: {}", e),
        }
    }
}

/// Forward snapshots the backend pushes on its own into the store. Exits
/// when the store is dropped or the backend closes its channel.
fn spawn_sync_listener(store: &Arc<Store>) {
    let mut changes = store.backend.changes();
    let store: Weak<Store> = Arc::downgrade(store);

    tokio::spawn(async move {
        loop {
            let snapshot = match changes.recv().await {
                Ok(snapshot) => snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Sync listener skipped {} snapshots", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            };
            let Some(store) = store.upgrade() else {
                return;
            };
            store.absorb(snapshot).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, OfflineBackend};
    use crate::db::{init_database, KvStore};
    use crate::models::DEFAULT_FLAVORS;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    async fn local_store(dir: &TempDir) -> Arc<Store> {
        let pool = init_database(&dir.path().join("store.sqlite")).await.unwrap();
        let backend = LocalBackend::open(KvStore::new(pool)).await.unwrap();
        Store::open(Arc::new(backend)).await
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn counter(store: &Store) -> (Arc<AtomicUsize>, Subscription) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let subscription = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (calls, subscription)
    }

    #[tokio::test]
    async fn test_first_open_seeds_defaults() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;

        let flavors = store.list_flavors();
        let names: Vec<_> = flavors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, DEFAULT_FLAVORS.to_vec());
        assert!(flavors.iter().all(|f| !f.is_custom));
        assert!(store.list_logs().is_empty());
        assert!(store.is_connected());
        assert_eq!(store.kind(), BackendKind::Local);
    }

    #[tokio::test]
    async fn test_reopen_does_not_reseed() {
        let dir = TempDir::new().unwrap();
        {
            let store = local_store(&dir).await;
            let id = store.list_flavors()[0].id.clone();
            store.delete_flavor(&id).await.unwrap();
        }

        let store = local_store(&dir).await;
        assert_eq!(store.list_flavors().len(), DEFAULT_FLAVORS.len() - 1);
    }

    #[tokio::test]
    async fn test_emptied_catalog_stays_empty_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = local_store(&dir).await;
            let ids: Vec<_> = store.list_flavors().iter().map(|f| f.id.clone()).collect();
            for id in ids {
                store.delete_flavor(&id).await.unwrap();
            }
            assert!(store.list_flavors().is_empty());
        }

        let store = local_store(&dir).await;
        assert!(store.list_flavors().is_empty());
    }

    #[tokio::test]
    async fn test_add_log_sequence_has_unique_ids() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;

        let mut ids = HashSet::new();
        for flavor in ["A", "B", "A", "C"] {
            ids.insert(store.add_log(flavor, Utc::now()).await.unwrap());
        }

        let logs = store.list_logs();
        assert_eq!(ids.len(), 4);
        assert_eq!(logs.len(), 4);
        assert!(logs.iter().all(|l| ids.contains(&l.id)));
        // Newest insert sits at the head.
        assert_eq!(logs[0].flavor, "C");
    }

    #[tokio::test]
    async fn test_add_log_keeps_notes() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;

        let id = store
            .add_log_with_notes("Rehab", at("2024-05-01T08:00:00Z"), Some("pre-run".into()))
            .await
            .unwrap();

        let logs = store.list_logs();
        assert_eq!(logs[0].id, id);
        assert_eq!(logs[0].notes.as_deref(), Some("pre-run"));
    }

    #[tokio::test]
    async fn test_delete_log_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let keep = store.add_log("A", Utc::now()).await.unwrap();
        let gone = store.add_log("B", Utc::now()).await.unwrap();

        store.delete_log(&gone).await.unwrap();
        store.delete_log(&gone).await.unwrap();

        let ids: Vec<_> = store.list_logs().iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec![keep]);
    }

    #[tokio::test]
    async fn test_update_log_merges_fields() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let id = store.add_log("A", at("2024-01-01T10:00:00Z")).await.unwrap();

        let updated = store
            .update_log(
                &id,
                LogPatch {
                    timestamp: Some(at("2024-01-02T10:00:00Z")),
                    ..LogPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(updated);
        let logs = store.list_logs();
        assert_eq!(logs[0].flavor, "A");
        assert_eq!(logs[0].timestamp, at("2024-01-02T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_update_unknown_ids_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let revision = store.revision();

        assert!(!store.update_log("nope", LogPatch::flavor("X")).await.unwrap());
        assert!(!store.update_flavor("nope", "X").await.unwrap());
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_add_flavor_ignores_case_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let before = store.list_flavors().len();

        assert!(store.add_flavor("Pipeline Punch").await.unwrap());
        assert!(!store.add_flavor("pipeline punch").await.unwrap());
        assert!(!store.add_flavor("ULTRA STRAWBERRY DREAMS").await.unwrap());

        let flavors = store.list_flavors();
        assert_eq!(flavors.len(), before + 1);
        let added = flavors.last().unwrap();
        assert_eq!(added.name, "Pipeline Punch");
        assert!(added.is_custom);
    }

    #[tokio::test]
    async fn test_rename_cascades_to_matching_logs() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        store.add_flavor("Mango Loco").await.unwrap();
        let flavor_id = store
            .list_flavors()
            .iter()
            .find(|f| f.name == "Mango Loco")
            .unwrap()
            .id
            .clone();

        let a = store.add_log("Mango Loco", Utc::now()).await.unwrap();
        let b = store.add_log("Rehab", Utc::now()).await.unwrap();
        let c = store.add_log("Mango Loco", Utc::now()).await.unwrap();

        let (calls, _subscription) = counter(&store);
        assert!(store.update_flavor(&flavor_id, "Mango Loco Zero").await.unwrap());

        // One batch, one notification.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let logs = store.list_logs();
        let flavor_of = |id: &str| logs.iter().find(|l| l.id == id).unwrap().flavor.clone();
        assert_eq!(flavor_of(&a), "Mango Loco Zero");
        assert_eq!(flavor_of(&b), "Rehab");
        assert_eq!(flavor_of(&c), "Mango Loco Zero");
        assert!(logs.iter().all(|l| l.flavor != "Mango Loco"));
        assert!(store.list_flavors().iter().any(|f| f.name == "Mango Loco Zero"));
    }

    #[tokio::test]
    async fn test_delete_flavor_leaves_logs() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let flavor = store.list_flavors()[0].clone();
        store.add_log(&flavor.name, Utc::now()).await.unwrap();

        store.delete_flavor(&flavor.id).await.unwrap();

        assert!(store.list_flavors().iter().all(|f| f.id != flavor.id));
        assert_eq!(store.list_logs()[0].flavor, flavor.name);
    }

    #[tokio::test]
    async fn test_subscription_stops_after_dispose() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let (calls, subscription) = counter(&store);

        store.add_log("A", Utc::now()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        store.add_log("B", Utc::now()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (calls, subscription) = counter(&store);
        drop(subscription);
        store.add_log("C", Utc::now()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).await;
        let stale = store.current();
        store.add_log("A", Utc::now()).await.unwrap();

        let (calls, _subscription) = counter(&store);
        assert!(!store.install(stale));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.list_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_is_empty_and_refuses_writes() {
        let backend = OfflineBackend::new(BackendKind::Remote, "no URL configured");
        let store = Store::open(Arc::new(backend)).await;

        assert!(!store.is_connected());
        assert!(store.list_logs().is_empty());
        assert!(store.list_flavors().is_empty());
        assert_eq!(store.revision(), 0);

        let err = store.add_log("A", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    /// Backend that accepts writes and publishes their result only when
    /// `echo` is called, like a server stream would.
    struct EchoBackend {
        state: Mutex<Snapshot>,
        queued: Mutex<Vec<Write>>,
        changes: broadcast::Sender<Snapshot>,
    }

    impl EchoBackend {
        fn new(logs: Vec<LogEntry>, flavors: Vec<Flavor>) -> Self {
            let (changes, _) = broadcast::channel(16);
            Self {
                state: Mutex::new(Snapshot::new(1, logs, flavors)),
                queued: Mutex::new(Vec::new()),
                changes,
            }
        }

        fn echo(&self) {
            let writes: Vec<Write> = self.queued.lock().unwrap().drain(..).collect();
            let mut state = self.state.lock().unwrap();
            let mut logs = state.logs.as_ref().clone();
            let mut flavors = state.flavors.as_ref().clone();
            for write in writes {
                match write {
                    Write::UpdateLog { id, patch } => {
                        if let Some(entry) = logs.iter_mut().find(|l| l.id == id) {
                            entry.apply(&patch);
                        }
                    }
                    Write::DeleteLog { id } => logs.retain(|l| l.id != id),
                    Write::RenameFlavor { id, name } => {
                        if let Some(flavor) = flavors.iter_mut().find(|f| f.id == id) {
                            flavor.name = name;
                        }
                    }
                    Write::DeleteFlavor { id } => flavors.retain(|f| f.id != id),
                    Write::RetagLogs { from, to } => {
                        for entry in logs.iter_mut().filter(|l| l.flavor == from) {
                            entry.flavor = to.clone();
                        }
                    }
                }
            }
            *state = Snapshot::new(state.version + 1, logs, flavors);
            self.changes.send(state.clone()).unwrap();
        }
    }

    #[async_trait]
    impl Backend for EchoBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn snapshot(&self) -> Option<Snapshot> {
            Some(self.state.lock().unwrap().clone())
        }

        fn changes(&self) -> broadcast::Receiver<Snapshot> {
            self.changes.subscribe()
        }

        async fn create_log(&self, _record: LogRecord) -> Result<(String, Ack), AppError> {
            Err(AppError::Internal("not used".into()))
        }

        async fn create_flavors(&self, _records: Vec<FlavorRecord>) -> Result<Ack, AppError> {
            Ok(Ack::Pending)
        }

        async fn commit(&self, writes: Vec<Write>) -> Result<Ack, AppError> {
            self.queued.lock().unwrap().extend(writes);
            Ok(Ack::Pending)
        }
    }

    async fn wait_for(store: &Store, revision: u64) {
        for _ in 0..100 {
            if store.revision() >= revision {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached revision {}", revision);
    }

    #[tokio::test]
    async fn test_remote_rename_visible_after_echo() {
        let now = Utc::now();
        let backend = Arc::new(EchoBackend::new(
            vec![
                LogRecord::new("Old", now).into_entry("l1".into()),
                LogRecord::new("Other", now).into_entry("l2".into()),
            ],
            vec![FlavorRecord::custom("Old").into_flavor("f1".into())],
        ));
        let store = Store::open(backend.clone()).await;
        let (calls, _subscription) = counter(&store);

        assert!(store.update_flavor("f1", "New").await.unwrap());

        // Accepted but not echoed: the old state is still what readers see.
        assert_eq!(store.list_flavors()[0].name, "Old");
        assert_eq!(store.list_logs()[0].flavor, "Old");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        backend.echo();
        wait_for(&store, 2).await;

        assert_eq!(store.list_flavors()[0].name, "New");
        assert!(store.list_logs().iter().all(|l| l.flavor != "Old"));
        assert_eq!(store.list_logs()[1].flavor, "Other");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_first_empty_snapshot_requests_seed() {
        let backend = Arc::new(EchoBackend::new(Vec::new(), Vec::new()));
        let store = Store::open(backend.clone()).await;

        // The seed was handed to the backend; its echo is what fills the list.
        assert!(store.seed_checked.load(Ordering::SeqCst));
        assert!(store.list_flavors().is_empty());
        assert_eq!(store.revision(), 1);
    }
}
