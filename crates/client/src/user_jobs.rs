//! Per-user job state: archive flag and generated offer.
//!
//! Associations are created lazily, one per (user, job). Lookups are keyed by
//! the association's `job` field.

use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::watch;

use jobtrack_core::{DomainError, Filter, JobId, MapId, UserId, UserJobMap, collections, timestamp};
use jobtrack_events::{RecordAction, RecordEvent, Subscription, SubscriptionHandle};

use crate::backend::{Backend, ListQuery};
use crate::cache::RecordCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

#[derive(Default)]
struct UserJobsState {
    cache: RecordCache<UserJobMap>,
    session: Option<UserId>,
}

impl UserJobsState {
    fn by_job(&self, job: &JobId) -> Option<&UserJobMap> {
        self.cache.find(|m| m.job.as_ref() == Some(job))
    }

    /// Upsert keyed by job. A stale entry for the same job under another id
    /// is replaced.
    fn upsert(&mut self, map: UserJobMap) {
        let Some(job) = map.job.clone() else {
            return;
        };
        let stale = self
            .by_job(&job)
            .filter(|existing| existing.id != map.id)
            .map(|existing| existing.id.clone());
        if let Some(stale) = stale {
            self.cache.remove(&stale);
        }
        self.cache.upsert_front(map);
    }
}

pub struct UserJobsStore {
    backend: Arc<dyn Backend>,
    config: ClientConfig,
    state: RwLock<UserJobsState>,
    create_lock: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    revision: watch::Sender<u64>,
}

impl UserJobsStore {
    pub fn new(backend: Arc<dyn Backend>, config: &ClientConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            backend,
            config: config.clone(),
            state: RwLock::new(UserJobsState::default()),
            create_lock: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            revision,
        }
    }

    /// Replace the cache with every association of `user`.
    pub async fn load(&self, user: &UserId) -> ClientResult<usize> {
        {
            let mut state = self.write()?;
            state.session = Some(user.clone());
        }

        let query = ListQuery::new()
            .filter(Filter::eq("user", user.as_str()))
            .sort("-created");
        let records = self
            .backend
            .get_full_list(collections::USER_JOB_MAP, &query)
            .await?;
        let maps = records
            .into_iter()
            .map(UserJobMap::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        let count = {
            let mut state = self.write()?;
            if state.session.as_ref() != Some(user) {
                return Ok(0);
            }
            state.cache.clear();
            // Oldest first so the newest ends up at the front.
            for map in maps.into_iter().rev().filter(|m| m.job.is_some()) {
                state.upsert(map);
            }
            state.cache.len()
        };
        self.bump();
        tracing::info!(user = %user, count, "job associations loaded");
        Ok(count)
    }

    pub async fn reload(&self) -> ClientResult<usize> {
        let user = self.require_session()?;
        self.load(&user).await
    }

    /// The association for (session user, `job`), creating it if missing.
    ///
    /// Concurrent calls in this process share one create. If another client
    /// won the race the backend rejects the duplicate and the existing record
    /// is fetched instead.
    pub async fn get_or_create_map(&self, job: &JobId) -> ClientResult<UserJobMap> {
        let user = self.require_session()?;
        if let Some(existing) = self.get(job) {
            return Ok(existing);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(existing) = self.get(job) {
            return Ok(existing);
        }

        let body = json!({"user": user, "job": job});
        let record = match self.backend.create(collections::USER_JOB_MAP, &body).await {
            Ok(record) => record,
            Err(err) if err.is_not_unique() => {
                tracing::debug!(job = %job, "association already exists, fetching it");
                let filter = Filter::eq("user", user.as_str()).and(Filter::eq("job", job.as_str()));
                self.backend
                    .get_first(collections::USER_JOB_MAP, &filter)
                    .await?
                    .ok_or_else(|| ClientError::Domain(DomainError::not_found()))?
            }
            Err(err) => return Err(err),
        };

        let map = UserJobMap::from_value(record)?;
        self.remember(&user, map.clone());
        Ok(map)
    }

    /// Flip the archived state of `job` and persist it.
    pub async fn toggle_archive(&self, job: &JobId) -> ClientResult<UserJobMap> {
        let map = self.get_or_create_map(job).await?;
        let archived = if map.is_archived() {
            Value::Null
        } else {
            Value::String(timestamp::format(&Utc::now()))
        };

        let record = self
            .backend
            .update(collections::USER_JOB_MAP, map.id.as_str(), &json!({"archived": archived}))
            .await?;
        let updated = UserJobMap::from_value(record)?;

        let user = self.require_session()?;
        self.remember(&user, updated.clone());
        tracing::debug!(job = %job, archived = updated.is_archived(), "archive toggled");
        Ok(updated)
    }

    /// Ask the backend to generate an offer for `job` and return its text.
    ///
    /// On failure nothing local changes.
    pub async fn generate_offer(&self, job: &JobId) -> ClientResult<String> {
        let user = self.require_session()?;
        let path = self.config.offer_path_for(job.as_str());

        let response = self.backend.send(Method::POST, &path, None).await?;
        if !response.is_success() {
            let err = ClientError::from_response_body(response.status, &response.body);
            tracing::warn!(job = %job, error = %err, "offer generation failed");
            return Err(err);
        }

        let offer = response
            .body
            .get("offer")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Parse("offer response has no `offer` field".to_string()))?;

        let merged = {
            let mut state = self.write()?;
            if state.session.as_ref() != Some(&user) {
                return Ok(offer);
            }
            match state.by_job(job).cloned() {
                Some(mut map) => {
                    map.offer = Some(offer.clone());
                    state.upsert(map);
                    true
                }
                None => false,
            }
        };

        if merged {
            self.bump();
        } else {
            self.load(&user).await?;
        }
        Ok(offer)
    }

    pub fn get(&self, job: &JobId) -> Option<UserJobMap> {
        self.state.read().ok().and_then(|s| s.by_job(job).cloned())
    }

    pub fn is_archived(&self, job: &JobId) -> bool {
        self.get(job).is_some_and(|m| m.is_archived())
    }

    pub fn get_offer(&self, job: &JobId) -> Option<String> {
        self.get(job).filter(|m| m.has_offer()).and_then(|m| m.offer)
    }

    pub fn is_offer(&self, job: &JobId) -> bool {
        self.get(job).is_some_and(|m| m.has_offer())
    }

    /// Open the change stream for the session user's associations.
    pub async fn subscribe(&self) -> ClientResult<Subscription<RecordEvent>> {
        let user = self.require_session()?;
        self.unsubscribe();

        let filter = Filter::eq("user", user.as_str());
        let subscription = self
            .backend
            .subscribe(collections::USER_JOB_MAP, Some(&filter))
            .await?;
        if let Ok(mut slot) = self.subscription.lock() {
            if let Some(previous) = slot.replace(subscription.handle()) {
                previous.cancel();
            }
        }
        Ok(subscription)
    }

    pub fn unsubscribe(&self) {
        let handle = self.subscription.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Fold one change event into the cache. Returns true if it changed.
    ///
    /// Events for other users are ignored. A delete without `job` falls back
    /// to removal by record id.
    pub fn apply_event(&self, event: &RecordEvent) -> bool {
        if event.collection().is_some_and(|c| c != collections::USER_JOB_MAP) {
            return false;
        }
        let changed = match self.state.write() {
            Ok(mut state) => apply_to(&mut state, event),
            Err(_) => false,
        };
        if changed {
            self.bump();
        }
        changed
    }

    pub fn clear(&self) {
        self.unsubscribe();
        if let Ok(mut state) = self.state.write() {
            state.cache.clear();
            state.session = None;
        }
        self.bump();
    }

    pub fn session(&self) -> Option<UserId> {
        self.state.read().ok().and_then(|s| s.session.clone())
    }

    pub fn maps(&self) -> Vec<UserJobMap> {
        self.state.read().map(|s| s.cache.to_vec()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn require_session(&self) -> ClientResult<UserId> {
        self.session().ok_or(ClientError::NotSignedIn)
    }

    /// Cache `map` unless the session moved on while we were waiting.
    fn remember(&self, user: &UserId, map: UserJobMap) {
        let stored = match self.state.write() {
            Ok(mut state) if state.session.as_ref() == Some(user) => {
                state.upsert(map);
                true
            }
            _ => false,
        };
        if stored {
            self.bump();
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn write(&self) -> ClientResult<std::sync::RwLockWriteGuard<'_, UserJobsState>> {
        self.state
            .write()
            .map_err(|_| ClientError::Poisoned("user jobs store"))
    }
}

fn apply_to(state: &mut UserJobsState, event: &RecordEvent) -> bool {
    let Some(session) = state.session.clone() else {
        return false;
    };
    let user = event.record.get("user").and_then(Value::as_str);
    if user.is_some_and(|u| u != session.as_str()) {
        return false;
    }

    match event.action {
        RecordAction::Create | RecordAction::Update => {
            if user.is_none() {
                return false;
            }
            match UserJobMap::from_value(event.record.clone()) {
                Ok(map) if map.job.is_some() => {
                    state.upsert(map);
                    true
                }
                Ok(_) => false,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed association event");
                    false
                }
            }
        }
        RecordAction::Delete => {
            let job = event
                .record
                .get("job")
                .and_then(Value::as_str)
                .filter(|j| !j.is_empty());
            let target = match job {
                Some(job) => state.by_job(&JobId::from(job)).map(|m| m.id.clone()),
                None => event.record_id().map(MapId::from),
            };
            match target {
                Some(id) => state.cache.remove(&id).is_some(),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, SendResponse};

    async fn signed_in(backend: Arc<InMemoryBackend>) -> UserJobsStore {
        let store = UserJobsStore::new(backend, &ClientConfig::default());
        store.load(&UserId::from("u1")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn missing_association_defaults_to_inactive() {
        let store = signed_in(Arc::new(InMemoryBackend::new())).await;
        let j2 = JobId::from("j2");
        assert!(!store.is_archived(&j2));
        assert!(!store.is_offer(&j2));
        assert_eq!(store.get_offer(&j2), None);
    }

    #[tokio::test]
    async fn load_only_keeps_the_users_associations() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("user_job_map", json!({"user": "u1", "job": "j1"})).unwrap();
        backend.insert("user_job_map", json!({"user": "u2", "job": "j2"})).unwrap();
        backend.insert("user_job_map", json!({"user": "u1", "job": ""})).unwrap();

        let store = signed_in(backend).await;
        assert_eq!(store.len(), 1);
        assert!(store.get(&JobId::from("j1")).is_some());
    }

    #[tokio::test]
    async fn operations_require_a_session() {
        let store = UserJobsStore::new(Arc::new(InMemoryBackend::new()), &ClientConfig::default());
        let job = JobId::from("j1");
        assert!(matches!(store.get_or_create_map(&job).await, Err(ClientError::NotSignedIn)));
        assert!(matches!(store.generate_offer(&job).await, Err(ClientError::NotSignedIn)));
        assert!(matches!(store.subscribe().await, Err(ClientError::NotSignedIn)));
    }

    #[tokio::test]
    async fn toggle_archive_is_its_own_inverse() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = signed_in(backend.clone()).await;
        let job = JobId::from("j1");

        let first = store.toggle_archive(&job).await.unwrap();
        assert!(first.is_archived());
        assert!(store.is_archived(&job));

        let second = store.toggle_archive(&job).await.unwrap();
        assert!(!second.is_archived());
        assert!(!store.is_archived(&job));
        assert_eq!(backend.count("user_job_map"), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_creates_once() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = signed_in(backend.clone()).await;
        let job = JobId::from("j1");

        let (a, b) = tokio::join!(store.get_or_create_map(&job), store.get_or_create_map(&job));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(backend.count("user_job_map"), 1);
    }

    #[tokio::test]
    async fn duplicate_rejection_fetches_the_existing_record() {
        let backend = Arc::new(InMemoryBackend::new().with_unique("user_job_map", &["user", "job"]));
        let existing = backend
            .insert("user_job_map", json!({"user": "u1", "job": "j1"}))
            .unwrap();
        let store = UserJobsStore::new(backend.clone(), &ClientConfig::default());
        // Session bound without loading, as if the record appeared afterwards.
        store.write().unwrap().session = Some(UserId::from("u1"));

        let map = store.get_or_create_map(&JobId::from("j1")).await.unwrap();
        assert_eq!(map.id.as_str(), existing["id"].as_str().unwrap());
        assert_eq!(backend.count("user_job_map"), 1);
    }

    #[tokio::test]
    async fn generate_offer_merges_into_cached_association() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("user_job_map", json!({"id": "m1", "user": "u1", "job": "j1"})).unwrap();
        backend.set_send_handler(|method, path, _| {
            assert_eq!(method, &Method::POST);
            assert_eq!(path, "/api/jobs/j1/generate-offer");
            Ok(SendResponse {
                status: 200,
                body: json!({"offer": "Dear hiring manager"}),
            })
        });
        let store = signed_in(backend).await;
        let job = JobId::from("j1");

        let offer = store.generate_offer(&job).await.unwrap();
        assert_eq!(offer, "Dear hiring manager");
        assert!(store.is_offer(&job));
        assert_eq!(store.get_offer(&job).as_deref(), Some("Dear hiring manager"));
    }

    #[tokio::test]
    async fn offer_requests_follow_the_configured_path() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = ClientConfig {
            offer_path: "/api/offers/{id}".to_string(),
            ..ClientConfig::default()
        };
        let store = UserJobsStore::new(backend.clone(), &config);
        store.load(&UserId::from("u1")).await.unwrap();
        backend.set_send_handler(|_, _, _| {
            Ok(SendResponse {
                status: 200,
                body: json!({"offer": "Hi"}),
            })
        });

        store.generate_offer(&JobId::from("j 1")).await.unwrap();

        let sent = backend.sent_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, "/api/offers/j%201");
    }

    #[tokio::test]
    async fn failed_offer_leaves_state_untouched() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("user_job_map", json!({"id": "m1", "user": "u1", "job": "j1"})).unwrap();
        backend.set_send_handler(|_, _, _| {
            Ok(SendResponse {
                status: 500,
                body: json!({"status": 500, "message": "model unavailable", "data": {}}),
            })
        });
        let store = signed_in(backend).await;
        let before = store.maps();

        let err = store.generate_offer(&JobId::from("j1")).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(store.maps(), before);
    }

    #[tokio::test]
    async fn uncached_offer_reloads_associations() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = signed_in(backend.clone()).await;
        let seeded = backend.clone();
        backend.set_send_handler(move |_, _, _| {
            // The backend persists the offer itself.
            seeded.insert(
                "user_job_map",
                json!({"user": "u1", "job": "j9", "offer": "Hello"}),
            )?;
            Ok(SendResponse {
                status: 200,
                body: json!({"offer": "Hello"}),
            })
        });

        store.generate_offer(&JobId::from("j9")).await.unwrap();
        assert_eq!(store.get_offer(&JobId::from("j9")).as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn events_for_other_users_are_ignored_and_deletes_fall_back_to_id() {
        let store = signed_in(Arc::new(InMemoryBackend::new())).await;

        assert!(!store.apply_event(&RecordEvent::create(
            json!({"id": "m2", "user": "u2", "job": "j1", "collectionName": "user_job_map"})
        )));
        assert!(store.apply_event(&RecordEvent::create(
            json!({"id": "m1", "user": "u1", "job": "j1", "collectionName": "user_job_map"})
        )));
        assert!(store.apply_event(&RecordEvent::update(
            json!({"id": "m1", "user": "u1", "job": "j1", "archived": "2024-05-01 10:00:00.000Z"})
        )));
        assert!(store.is_archived(&JobId::from("j1")));

        assert!(store.apply_event(&RecordEvent::delete(json!({"id": "m1"}))));
        assert!(store.is_empty());
    }
}
