//! Jobs store: cached `jobs` collection plus the filter state of the view.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;

use jobtrack_core::{Filter, Job, JobId, STATUS_PROCESSED, UserId, collections};
use jobtrack_events::{Projection, RecordEvent, Subscription, SubscriptionHandle};

use crate::backend::{Backend, ListQuery};
use crate::cache::PredicateCache;
use crate::error::{ClientError, ClientResult};
use crate::user_jobs::UserJobsStore;
use crate::view::{ArchiveView, JobFilter, RemoteFilter, derive_view};

struct JobsState {
    cache: PredicateCache<Job>,
    session: Option<UserId>,
    filter: JobFilter,
}

pub struct JobsStore {
    backend: Arc<dyn Backend>,
    state: RwLock<JobsState>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    revision: watch::Sender<u64>,
}

impl JobsStore {
    /// Store over processed jobs.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_predicate(backend, Filter::eq("status", STATUS_PROCESSED))
    }

    pub fn with_predicate(backend: Arc<dyn Backend>, predicate: Filter) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            backend,
            state: RwLock::new(JobsState {
                cache: PredicateCache::new(predicate, Job::from_value),
                session: None,
                filter: JobFilter::default(),
            }),
            subscription: Mutex::new(None),
            revision,
        }
    }

    /// Fetch the snapshot for `user` and replace the cache with it.
    ///
    /// Returns the number of cached jobs. A snapshot that arrives after the
    /// session changed is discarded.
    pub async fn load(&self, user: &UserId) -> ClientResult<usize> {
        let predicate = {
            let mut state = self.write()?;
            state.session = Some(user.clone());
            state.cache.predicate().clone()
        };

        let query = ListQuery::new().filter(predicate).sort("-created");
        let records = self.backend.get_full_list(collections::JOBS, &query).await?;
        let jobs = records
            .into_iter()
            .map(Job::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        let count = {
            let mut state = self.write()?;
            if state.session.as_ref() != Some(user) {
                tracing::debug!(user = %user, "discarding jobs snapshot for stale session");
                return Ok(0);
            }
            state.cache.replace_all(jobs);
            state.cache.records().len()
        };
        self.bump();
        tracing::info!(user = %user, count, "jobs loaded");
        Ok(count)
    }

    /// Reload the snapshot for the current session.
    pub async fn reload(&self) -> ClientResult<usize> {
        let user = self.session().ok_or(ClientError::NotSignedIn)?;
        self.load(&user).await
    }

    /// Open the change stream. Any previous stream of this store is cancelled.
    ///
    /// The stream is unfiltered server-side so updates that move a record out
    /// of the predicate are still delivered and can evict it.
    pub async fn subscribe(&self) -> ClientResult<Subscription<RecordEvent>> {
        if self.session().is_none() {
            return Err(ClientError::NotSignedIn);
        }
        self.unsubscribe();

        let subscription = self.backend.subscribe(collections::JOBS, None).await?;
        if let Ok(mut slot) = self.subscription.lock() {
            if let Some(previous) = slot.replace(subscription.handle()) {
                previous.cancel();
            }
        }
        Ok(subscription)
    }

    /// Fold one change event into the cache. Returns true if it changed.
    pub fn apply_event(&self, event: &RecordEvent) -> bool {
        if event.collection().is_some_and(|c| c != collections::JOBS) {
            return false;
        }
        let changed = match self.state.write() {
            Ok(mut state) if state.session.is_some() => state.cache.apply(event),
            _ => false,
        };
        if changed {
            self.bump();
        }
        changed
    }

    pub fn unsubscribe(&self) {
        let handle = self.subscription.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Close the stream, drop cached jobs and forget the session.
    ///
    /// Filter inputs survive so the next session starts with the same view.
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

    pub fn jobs(&self) -> Vec<Job> {
        self.state
            .read()
            .map(|s| s.cache.records().to_vec())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.cache.records().get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.cache.records().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn filter(&self) -> JobFilter {
        self.state.read().map(|s| s.filter.clone()).unwrap_or_default()
    }

    /// The derived view over the current cache and filter.
    pub fn filtered_jobs(&self, user_jobs: &UserJobsStore) -> Vec<Job> {
        let (jobs, filter) = match self.state.read() {
            Ok(state) => (state.cache.records().to_vec(), state.filter.clone()),
            Err(_) => return Vec::new(),
        };
        derive_view(&jobs, |id| user_jobs.is_archived(id), &filter)
    }

    pub fn set_filter(&self, filter: JobFilter) {
        self.update_filter(|f| *f = filter);
    }

    pub fn set_search(&self, search: impl Into<String>) {
        let search = search.into();
        self.update_filter(|f| f.search = search);
    }

    pub fn set_remote(&self, remote: RemoteFilter) {
        self.update_filter(|f| f.remote = remote);
    }

    pub fn set_grade(&self, grade: impl Into<String>) {
        let grade = grade.into();
        self.update_filter(|f| f.grade = grade);
    }

    pub fn set_view(&self, view: ArchiveView) {
        self.update_filter(|f| f.view = view);
    }

    /// Revision counter, bumped on every cache or filter change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn update_filter(&self, change: impl FnOnce(&mut JobFilter)) {
        if let Ok(mut state) = self.state.write() {
            change(&mut state.filter);
        }
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn write(&self) -> ClientResult<std::sync::RwLockWriteGuard<'_, JobsState>> {
        self.state
            .write()
            .map_err(|_| ClientError::Poisoned("jobs store"))
    }
}
