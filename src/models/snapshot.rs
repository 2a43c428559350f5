//! Snapshot of both collections plus the feed/status payloads built from it.

use std::sync::Arc;

use serde::Serialize;

use super::{Flavor, LogEntry};
use crate::backend::BackendKind;

/// Full in-memory copy of both collections at one point in time.
///
/// Snapshots are replaced wholesale, never patched in place. `version` grows
/// with every change the backend reports, so an older snapshot can be told
/// apart from a newer one.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: u64,
    pub logs: Arc<Vec<LogEntry>>,
    pub flavors: Arc<Vec<Flavor>>,
}

impl Snapshot {
    pub fn new(version: u64, logs: Vec<LogEntry>, flavors: Vec<Flavor>) -> Self {
        Self {
            version,
            logs: Arc::new(logs),
            flavors: Arc::new(flavors),
        }
    }
}

/// Everything a client needs to render the feed and the admin tables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub backend: BackendKind,
    pub connected: bool,
    pub logs: Vec<LogEntry>,
    pub flavors: Vec<Flavor>,
}

/// Connectivity and collection sizes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub backend: BackendKind,
    pub connected: bool,
    pub log_count: usize,
    pub flavor_count: usize,
    /// Live change listeners, mostly open event streams.
    pub subscribers: usize,
}
