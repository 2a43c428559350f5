//! Realtime database persistence over its REST protocol.
//!
//! Records live under `<base>/logs/<id>` and `<base>/flavors/<id>`. New
//! records are pushed with `POST` (the server picks the id), edits and
//! deletes go out as one multi-path `PATCH` on the base node, and each
//! collection is mirrored from its own `text/event-stream` listener. Writes
//! only become visible once the listener echoes them back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::sse::SseParser;
use super::tree::{apply_patch, apply_put};
use super::{Ack, Backend, BackendKind, Write, CHANGE_CHANNEL_CAPACITY};
use crate::errors::AppError;
use crate::models::{FlavorRecord, LogEntry, LogRecord, Snapshot};

const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection parameters for the realtime database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOptions {
    pub url: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Logs,
    Flavors,
}

impl Collection {
    fn path(self) -> &'static str {
        match self {
            Collection::Logs => "logs",
            Collection::Flavors => "flavors",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    path: String,
    data: Value,
}

#[derive(Default)]
struct Mirror {
    version: u64,
    logs: Option<Value>,
    flavors: Option<Value>,
}

struct Shared {
    http: reqwest::Client,
    base: String,
    auth_token: Option<String>,
    mirror: Mutex<Mirror>,
    current: RwLock<Option<Snapshot>>,
    logs_connected: AtomicBool,
    flavors_connected: AtomicBool,
    changes: broadcast::Sender<Snapshot>,
}

impl Shared {
    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AppError> {
        let response = self.authorize(request).timeout(WRITE_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "Realtime database answered {}: {}",
                status, body
            )));
        }
        Ok(response)
    }

    async fn push(&self, collection: Collection, record: &impl serde::Serialize) -> Result<String, AppError> {
        let response = self
            .send(self.http.post(self.url(collection.path())).json(record))
            .await?;
        let pushed: PushResponse = response.json().await?;
        Ok(pushed.name)
    }

    fn connected_flag(&self, collection: Collection) -> &AtomicBool {
        match collection {
            Collection::Logs => &self.logs_connected,
            Collection::Flavors => &self.flavors_connected,
        }
    }

    /// Fold one streamed event into the mirror and publish the new state
    /// once both collections have been received.
    fn apply(&self, collection: Collection, patch: bool, message: StreamMessage) {
        let mut mirror = self.mirror.lock().unwrap_or_else(|p| p.into_inner());
        let node = match collection {
            Collection::Logs => &mut mirror.logs,
            Collection::Flavors => &mut mirror.flavors,
        };
        let tree = node.get_or_insert(Value::Null);
        if patch {
            apply_patch(tree, &message.path, message.data);
        } else {
            apply_put(tree, &message.path, message.data);
        }

        mirror.version += 1;
        let version = mirror.version;
        let snapshot = match (&mirror.logs, &mirror.flavors) {
            (Some(logs), Some(flavors)) => Snapshot::new(
                version,
                decode_children(logs, LogRecord::into_entry, "log"),
                decode_children(flavors, FlavorRecord::into_flavor, "flavor"),
            ),
            _ => return,
        };

        // Still under the mirror lock so `current` and the channel never go
        // backwards.
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot.clone());
        let _ = self.changes.send(snapshot);
    }
}

/// Realtime database backend.
pub struct RemoteBackend {
    shared: Arc<Shared>,
    listeners: Vec<JoinHandle<()>>,
}

impl RemoteBackend {
    /// Validate the endpoint and start one listener per collection.
    pub fn connect(options: RemoteOptions) -> Result<Self, AppError> {
        let mut backend = Self::build(options)?;
        for collection in [Collection::Logs, Collection::Flavors] {
            let shared = backend.shared.clone();
            backend
                .listeners
                .push(tokio::spawn(listen(shared, collection)));
        }
        Ok(backend)
    }

    fn build(options: RemoteOptions) -> Result<Self, AppError> {
        let url = reqwest::Url::parse(options.url.trim())
            .map_err(|e| AppError::Unavailable(format!("Invalid realtime database URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Unavailable(format!(
                "Unsupported realtime database scheme: {}",
                url.scheme()
            )));
        }

        // No overall timeout: the listeners hold their responses open.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let shared = Shared {
            http,
            base: url.as_str().trim_end_matches('/').to_string(),
            auth_token: options.auth_token.filter(|t| !t.is_empty()),
            mirror: Mutex::new(Mirror::default()),
            current: RwLock::new(None),
            logs_connected: AtomicBool::new(false),
            flavors_connected: AtomicBool::new(false),
            changes,
        };

        Ok(Self {
            shared: Arc::new(shared),
            listeners: Vec::new(),
        })
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn is_connected(&self) -> bool {
        self.shared.logs_connected.load(Ordering::SeqCst)
            && self.shared.flavors_connected.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Option<Snapshot> {
        self.shared
            .current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn changes(&self) -> broadcast::Receiver<Snapshot> {
        self.shared.changes.subscribe()
    }

    async fn create_log(&self, record: LogRecord) -> Result<(String, Ack), AppError> {
        let id = self.shared.push(Collection::Logs, &record).await?;
        Ok((id, Ack::Pending))
    }

    async fn create_flavors(&self, records: Vec<FlavorRecord>) -> Result<Ack, AppError> {
        for record in &records {
            self.shared.push(Collection::Flavors, record).await?;
        }
        Ok(Ack::Pending)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<Ack, AppError> {
        let logs = self.snapshot().map(|s| s.logs).unwrap_or_default();
        let paths = write_paths(&writes, &logs);
        if paths.is_empty() {
            return Ok(Ack::Pending);
        }

        self.shared
            .send(self.shared.http.patch(self.shared.url("")).json(&paths))
            .await?;
        Ok(Ack::Pending)
    }
}

/// Flatten a batch into one multi-path update. The server applies it
/// atomically. Retagging resolves against the mirrored logs, so logs the
/// listener has not delivered yet are missed.
fn write_paths(writes: &[Write], logs: &[LogEntry]) -> Map<String, Value> {
    let mut paths = Map::new();
    for write in writes {
        match write {
            Write::UpdateLog { id, patch } => {
                for (field, value) in patch.fields() {
                    paths.insert(format!("logs/{}/{}", id, field), value);
                }
            }
            Write::DeleteLog { id } => {
                paths.insert(format!("logs/{}", id), Value::Null);
            }
            Write::RenameFlavor { id, name } => {
                paths.insert(format!("flavors/{}/name", id), Value::String(name.clone()));
            }
            Write::DeleteFlavor { id } => {
                paths.insert(format!("flavors/{}", id), Value::Null);
            }
            Write::RetagLogs { from, to } => {
                for entry in logs.iter().filter(|l| &l.flavor == from) {
                    paths.insert(
                        format!("logs/{}/flavor", entry.id),
                        Value::String(to.clone()),
                    );
                }
            }
        }
    }
    paths
}

/// Decode the children of a collection node, keyed by id. Malformed
/// children are skipped.
fn decode_children<R, T>(node: &Value, build: fn(R, String) -> T, what: &str) -> Vec<T>
where
    R: DeserializeOwned,
{
    let children: Vec<(String, &Value)> = match node {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };

    children
        .into_iter()
        .filter_map(|(id, value)| match R::deserialize(value) {
            Ok(record) => Some(build(record, id)),
            Err(e) => {
                tracing::warn!("Skipping malformed {} record {}: {}", what, id, e);
                None
            }
        })
        .collect()
}

/// Keep one collection stream open, reconnecting with exponential backoff.
async fn listen(shared: Arc<Shared>, collection: Collection) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let mut connected = false;
        match stream_once(&shared, collection, &mut connected).await {
            Ok(()) => tracing::info!("Realtime {} stream closed", collection.path()),
            Err(e) => tracing::warn!("Realtime {} stream failed: {}", collection.path(), e),
        }
        shared
            .connected_flag(collection)
            .store(false, Ordering::SeqCst);

        if connected {
            backoff = INITIAL_BACKOFF;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn stream_once(
    shared: &Shared,
    collection: Collection,
    connected: &mut bool,
) -> Result<(), AppError> {
    let request = shared
        .http
        .get(shared.url(collection.path()))
        .header(ACCEPT, "text/event-stream");
    let response = shared.authorize(request).send().await?;
    if !response.status().is_success() {
        return Err(AppError::Remote(format!(
            "Stream request answered {}",
            response.status()
        )));
    }

    *connected = true;
    shared
        .connected_flag(collection)
        .store(true, Ordering::SeqCst);
    tracing::info!("Realtime {} stream connected", collection.path());

    let mut parser = SseParser::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            match event.event.as_str() {
                "put" | "patch" => {
                    let message: StreamMessage = serde_json::from_str(&event.data).map_err(|e| {
                        AppError::Remote(format!("Malformed {} event: {}", event.event, e))
                    })?;
                    shared.apply(collection, event.event == "patch", message);
                }
                "keep-alive" => {}
                "cancel" | "auth_revoked" => {
                    return Err(AppError::Remote(format!(
                        "Stream {}: {}",
                        event.event, event.data
                    )));
                }
                other => tracing::debug!(
                    "Ignoring {} event on {} stream",
                    other,
                    collection.path()
                ),
            }
        }
    }

    Ok(())
}
