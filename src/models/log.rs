//! Log entry model matching the frontend MonsterLog interface.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One consumption event. `flavor` is a copy of the flavor name at logging
/// time, not a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub flavor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LogEntry {
    /// Merge the supplied fields into this entry.
    pub fn apply(&mut self, patch: &LogPatch) {
        if let Some(flavor) = &patch.flavor {
            self.flavor = flavor.clone();
        }
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone());
        }
    }
}

/// Persisted form of a log when the id is the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub flavor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LogRecord {
    pub fn new(flavor: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            flavor: flavor.into(),
            timestamp,
            notes: None,
        }
    }

    pub fn into_entry(self, id: String) -> LogEntry {
        LogEntry {
            id,
            flavor: self.flavor,
            timestamp: self.timestamp,
            notes: self.notes,
        }
    }
}

/// Partial update of a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPatch {
    pub flavor: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl LogPatch {
    pub fn flavor(name: impl Into<String>) -> Self {
        Self {
            flavor: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flavor.is_none() && self.timestamp.is_none() && self.notes.is_none()
    }

    /// Field name / value pairs as stored in a persisted record.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut fields = Vec::new();
        if let Some(flavor) = &self.flavor {
            fields.push(("flavor", Value::String(flavor.clone())));
        }
        if let Some(timestamp) = &self.timestamp {
            fields.push((
                "timestamp",
                Value::String(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            ));
        }
        if let Some(notes) = &self.notes {
            fields.push(("notes", Value::String(notes.clone())));
        }
        fields
    }
}

/// Sort logs for display: newest first, stable for equal timestamps.
pub fn feed_order(logs: &[LogEntry]) -> Vec<LogEntry> {
    let mut sorted = logs.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}

/// Request body for logging a new consumption.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLogRequest {
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Request body for editing an existing log.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLogRequest {
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<UpdateLogRequest> for LogPatch {
    fn from(request: UpdateLogRequest) -> Self {
        Self {
            flavor: request.flavor,
            timestamp: request.timestamp,
            notes: request.notes,
        }
    }
}

/// Response body for a created log.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedLog {
    pub id: String,
}
