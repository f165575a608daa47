//! In-memory backend for tests and local tooling.
//!
//! Behaves like the record service where the stores can observe it: records
//! get ids and timestamps, unique indexes reject duplicates with the backend's
//! error shape, and every write is pushed to matching subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{Map, Value, json};

use jobtrack_core::{Filter, id, timestamp};
use jobtrack_events::{EventBus, InMemoryEventBus, RecordEvent, Subscription};

use super::{Backend, ListQuery, SendResponse};
use crate::error::{ClientError, ClientResult};

/// Answers opaque requests made through [`Backend::send`].
pub type SendHandler =
    Arc<dyn Fn(&Method, &str, Option<&Value>) -> ClientResult<SendResponse> + Send + Sync>;

/// A request seen by [`Backend::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Value>>,
    unique: HashMap<String, Vec<Vec<String>>>,
    sent: Vec<SentRequest>,
}

pub struct InMemoryBackend {
    state: Mutex<State>,
    bus: InMemoryEventBus<RecordEvent>,
    send_handler: RwLock<Option<SendHandler>>,
    offline: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("bus", &self.bus)
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            bus: InMemoryEventBus::new(),
            send_handler: RwLock::new(None),
            offline: AtomicBool::new(false),
        }
    }

    /// Declare a unique index over `fields` of `collection`.
    pub fn with_unique(self, collection: &str, fields: &[&str]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .unique
                .entry(collection.to_string())
                .or_default()
                .push(fields.iter().map(|f| f.to_string()).collect());
        }
        self
    }

    pub fn set_send_handler(
        &self,
        handler: impl Fn(&Method, &str, Option<&Value>) -> ClientResult<SendResponse> + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.send_handler.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Seed a record as if another client created it.
    pub fn insert(&self, collection: &str, record: Value) -> ClientResult<Value> {
        let stored = self.store_new(collection, record)?;
        self.publish(RecordEvent::create(stored.clone()))?;
        Ok(stored)
    }

    /// Delete a record as if another client removed it.
    pub fn remove(&self, collection: &str, id: &str) -> ClientResult<Option<Value>> {
        let removed = {
            let mut state = self.lock()?;
            let records = state.collections.entry(collection.to_string()).or_default();
            records
                .iter()
                .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
                .map(|pos| records.remove(pos))
        };
        if let Some(record) = &removed {
            self.publish(RecordEvent::delete(record.clone()))?;
        }
        Ok(removed)
    }

    /// Snapshot of a collection in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.collections.get(collection).cloned())
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.records(collection).len()
    }

    pub fn sent_requests(&self) -> Vec<SentRequest> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Open subscriptions across all collections.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    fn lock(&self) -> ClientResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ClientError::Poisoned("in-memory backend"))
    }

    async fn round_trip(&self) -> ClientResult<()> {
        // Give other tasks a chance to run, as a real request would.
        tokio::task::yield_now().await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn publish(&self, event: RecordEvent) -> ClientResult<()> {
        self.bus
            .publish(event)
            .map_err(|e| ClientError::Realtime(e.to_string()))
    }

    fn store_new(&self, collection: &str, body: Value) -> ClientResult<Value> {
        let Value::Object(mut record) = body else {
            return Err(ClientError::Api {
                status: 400,
                message: "Failed to create record.".to_string(),
                data: json!({}),
            });
        };

        let record_id = match record.get("id").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => existing.to_string(),
            _ => id::generate_id(),
        };
        let now = timestamp::format(&Utc::now());
        record.insert("id".to_string(), Value::String(record_id));
        record.insert("collectionName".to_string(), Value::String(collection.to_string()));
        record.entry("created").or_insert_with(|| Value::String(now.clone()));
        record.insert("updated".to_string(), Value::String(now));

        let mut state = self.lock()?;
        if let Some(indexes) = state.unique.get(collection) {
            let existing = state.collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
            for fields in indexes {
                let clash = existing
                    .iter()
                    .any(|other| fields.iter().all(|f| other.get(f) == record.get(f)));
                if clash {
                    return Err(not_unique(fields));
                }
            }
        }

        let stored = Value::Object(record);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

fn not_unique(fields: &[String]) -> ClientError {
    let data: Map<String, Value> = fields
        .iter()
        .map(|f| {
            (
                f.clone(),
                json!({"code": "validation_not_unique", "message": "Value must be unique."}),
            )
        })
        .collect();
    ClientError::Api {
        status: 400,
        message: "Failed to create record.".to_string(),
        data: Value::Object(data),
    }
}

fn not_found() -> ClientError {
    ClientError::Api {
        status: 404,
        message: "The requested resource wasn't found.".to_string(),
        data: json!({}),
    }
}

fn sort_records(records: &mut [Value], sort: &str) {
    let (field, descending) = match sort.strip_prefix('-') {
        Some(field) => (field, true),
        None => (sort.strip_prefix('+').unwrap_or(sort), false),
    };
    records.sort_by(|a, b| sort_key(a, field).cmp(&sort_key(b, field)));
    if descending {
        // Ties come out newest-inserted first.
        records.reverse();
    }
}

fn sort_key(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_full_list(&self, collection: &str, query: &ListQuery) -> ClientResult<Vec<Value>> {
        self.round_trip().await?;
        let mut records: Vec<Value> = self
            .records(collection)
            .into_iter()
            .filter(|r| query.filter.as_ref().is_none_or(|f| f.matches(r)))
            .collect();
        if let Some(sort) = &query.sort {
            sort_records(&mut records, sort);
        }
        Ok(records)
    }

    async fn get_first(&self, collection: &str, filter: &Filter) -> ClientResult<Option<Value>> {
        self.round_trip().await?;
        Ok(self.records(collection).into_iter().find(|r| filter.matches(r)))
    }

    async fn create(&self, collection: &str, body: &Value) -> ClientResult<Value> {
        self.round_trip().await?;
        let stored = self.store_new(collection, body.clone())?;
        self.publish(RecordEvent::create(stored.clone()))?;
        Ok(stored)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> ClientResult<Value> {
        self.round_trip().await?;
        let updated = {
            let mut state = self.lock()?;
            let record = state
                .collections
                .get_mut(collection)
                .and_then(|records| {
                    records
                        .iter_mut()
                        .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                })
                .ok_or_else(not_found)?;

            if let (Value::Object(target), Value::Object(fields)) = (&mut *record, patch) {
                for (key, value) in fields {
                    if key == "id" || key == "collectionName" {
                        continue;
                    }
                    target.insert(key.clone(), value.clone());
                }
                target.insert(
                    "updated".to_string(),
                    Value::String(timestamp::format(&Utc::now())),
                );
            }
            record.clone()
        };
        self.publish(RecordEvent::update(updated.clone()))?;
        Ok(updated)
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> ClientResult<Subscription<RecordEvent>> {
        self.round_trip().await?;
        let collection = collection.to_string();
        let filter = filter.cloned();
        Ok(self.bus.subscribe_where(Box::new(move |event: &RecordEvent| {
            event.collection() == Some(collection.as_str())
                && filter.as_ref().is_none_or(|f| f.matches(&event.record))
        })))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> ClientResult<SendResponse> {
        self.round_trip().await?;
        self.lock()?.sent.push(SentRequest {
            method: method.clone(),
            path: path.to_string(),
            body: body.cloned(),
        });

        let handler = self.send_handler.read().ok().and_then(|h| h.clone());
        match handler {
            Some(handler) => handler(&method, path, body),
            None => Ok(SendResponse {
                status: 404,
                body: json!({"status": 404, "message": "Not found.", "data": {}}),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_events::RecordAction;

    #[tokio::test]
    async fn create_assigns_metadata_and_notifies() {
        let backend = InMemoryBackend::new();
        let mut sub = backend.subscribe("jobs", None).await.unwrap();

        let created = backend
            .create("jobs", &json!({"title": "Engineer", "status": "processed"}))
            .await
            .unwrap();

        assert_eq!(created["collectionName"], "jobs");
        assert_eq!(created["id"].as_str().map(str::len), Some(id::GENERATED_ID_LEN));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.action, RecordAction::Create);
        assert_eq!(event.record, created);
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicates() {
        let backend = InMemoryBackend::new().with_unique("user_job_map", &["user", "job"]);
        let body = json!({"user": "u1", "job": "j1"});

        backend.create("user_job_map", &body).await.unwrap();
        let err = backend.create("user_job_map", &body).await.unwrap_err();

        assert!(err.is_not_unique());
        assert_eq!(backend.count("user_job_map"), 1);
    }

    #[tokio::test]
    async fn full_list_filters_and_sorts_newest_first() {
        let backend = InMemoryBackend::new();
        backend
            .insert("jobs", json!({"id": "a", "status": "processed", "created": "2024-01-01 00:00:00.000Z"}))
            .unwrap();
        backend
            .insert("jobs", json!({"id": "b", "status": "pending", "created": "2024-01-02 00:00:00.000Z"}))
            .unwrap();
        backend
            .insert("jobs", json!({"id": "c", "status": "processed", "created": "2024-01-03 00:00:00.000Z"}))
            .unwrap();

        let query = ListQuery::new()
            .filter(Filter::eq("status", "processed"))
            .sort("-created");
        let ids: Vec<String> = backend
            .get_full_list("jobs", &query)
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn update_merges_patch_and_missing_ids_are_not_found() {
        let backend = InMemoryBackend::new();
        backend.insert("jobs", json!({"id": "j1", "title": "Old", "owner": "u1"})).unwrap();

        let updated = backend.update("jobs", "j1", &json!({"title": "New"})).await.unwrap();
        assert_eq!(updated["title"], "New");
        assert_eq!(updated["owner"], "u1");

        let err = backend.update("jobs", "nope", &json!({})).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn filtered_subscriptions_only_see_matching_records() {
        let backend = InMemoryBackend::new();
        let mut mine = backend
            .subscribe("user_job_map", Some(&Filter::eq("user", "u1")))
            .await
            .unwrap();

        backend.insert("user_job_map", json!({"user": "u2", "job": "j1"})).unwrap();
        backend.insert("user_job_map", json!({"user": "u1", "job": "j2"})).unwrap();
        backend.insert("jobs", json!({"user": "u1"})).unwrap();

        let event = mine.recv().await.unwrap();
        assert_eq!(event.record["job"], "j2");
        assert!(mine.try_recv().is_none());
    }

    #[tokio::test]
    async fn offline_backend_fails_with_network_errors() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        let err = backend.get_full_list("jobs", &ListQuery::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
