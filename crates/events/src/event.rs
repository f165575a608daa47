use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobtrack_core::DomainResult;

/// What happened to a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// A change notification as delivered by the realtime channel.
///
/// Wire shape: `{"action": "create" | "update" | "delete", "record": {...}}`.
/// The record is kept as JSON until a store decodes it, so one channel type
/// serves every collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent<R = Value> {
    pub action: RecordAction,
    pub record: R,
}

impl<R> RecordEvent<R> {
    pub fn new(action: RecordAction, record: R) -> Self {
        Self { action, record }
    }

    pub fn create(record: R) -> Self {
        Self::new(RecordAction::Create, record)
    }

    pub fn update(record: R) -> Self {
        Self::new(RecordAction::Update, record)
    }

    pub fn delete(record: R) -> Self {
        Self::new(RecordAction::Delete, record)
    }
}

impl RecordEvent<Value> {
    /// Collection the record belongs to, when the backend included it.
    pub fn collection(&self) -> Option<&str> {
        self.record.get("collectionName").and_then(Value::as_str)
    }

    /// Identifier of the record, when present.
    pub fn record_id(&self) -> Option<&str> {
        self.record.get("id").and_then(Value::as_str)
    }

    /// Decode the record into a typed event.
    pub fn decode<T>(&self, decode: impl FnOnce(Value) -> DomainResult<T>) -> DomainResult<RecordEvent<T>> {
        Ok(RecordEvent {
            action: self.action,
            record: decode(self.record.clone())?,
        })
    }
}
