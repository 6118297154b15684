//! Activity event record: the unit flowing from workers into the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether an event marks the start or the completion of a worker action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Completed,
}

/// A single observed worker action.
///
/// Fields are private: a record is built once by the producing worker and
/// never mutated afterwards. Identical records are legal and are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    source_id: String,
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    emitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl EventRecord {
    /// New record stamped with the current time and no parameters.
    pub fn new(source_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            action: action.into(),
            parameters: Map::new(),
            emitted_at: Utc::now(),
            kind: None,
            result: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_emitted_at(mut self, emitted_at: DateTime<Utc>) -> Self {
        self.emitted_at = emitted_at;
        self
    }

    /// Mark as the start of an action.
    pub fn started(mut self) -> Self {
        self.kind = Some(EventKind::Started);
        self
    }

    /// Mark as a completed action carrying its result.
    pub fn completed(mut self, result: impl Into<Value>) -> Self {
        self.kind = Some(EventKind::Completed);
        self.result = Some(result.into());
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.kind
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Single-line JSON form stored in the sliding window.
    ///
    /// Falls back to the `Debug` rendering if serialization fails, so an
    /// event is never lost between the queue and the window.
    pub fn to_window_entry(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "event serialization failed, using debug form");
            format!("{self:?}")
        })
    }
}
