//! Store bundle shared by a client process.

use std::sync::Arc;

use jobtrack_core::{Job, JobId, UserJobMap};

use crate::auth::AuthStore;
use crate::backend::{Backend, PocketBaseClient};
use crate::config::ClientConfig;
use crate::cookie::CookieSink;
use crate::error::ClientResult;
use crate::jobs::JobsStore;
use crate::session::SessionBinder;
use crate::sync::{SyncHandle, SyncLoop};
use crate::user_jobs::UserJobsStore;

/// Application state shared across the UI layer.
#[derive(Clone)]
pub struct Workspace {
    pub config: ClientConfig,
    pub auth: Arc<AuthStore>,
    pub backend: Arc<dyn Backend>,
    pub jobs: Arc<JobsStore>,
    pub user_jobs: Arc<UserJobsStore>,
    pub session: Arc<SessionBinder>,
}

impl Workspace {
    /// Wire the stores over an existing backend.
    pub fn new(
        config: ClientConfig,
        auth: Arc<AuthStore>,
        backend: Arc<dyn Backend>,
        cookies: Arc<dyn CookieSink>,
    ) -> Self {
        let jobs = Arc::new(JobsStore::new(backend.clone()));
        let user_jobs = Arc::new(UserJobsStore::new(backend.clone(), &config));
        let session = Arc::new(SessionBinder::new(
            jobs.clone(),
            user_jobs.clone(),
            cookies,
            config.cookie.clone(),
        ));

        Self {
            config,
            auth,
            backend,
            jobs,
            user_jobs,
            session,
        }
    }

    /// Workspace talking to a PocketBase server.
    pub fn pocketbase(config: ClientConfig, cookies: Arc<dyn CookieSink>) -> ClientResult<Self> {
        let auth = Arc::new(AuthStore::new());
        let backend = Arc::new(PocketBaseClient::new(config.clone(), auth.clone())?);
        Ok(Self::new(config, auth, backend, cookies))
    }

    /// Start the dispatch loop that keeps the stores in sync.
    pub fn spawn_sync(&self) -> SyncHandle {
        SyncLoop::new(
            self.session.clone(),
            self.jobs.clone(),
            self.user_jobs.clone(),
            self.auth.clone(),
        )
        .spawn()
    }

    /// Jobs as the UI should show them right now.
    pub fn visible_jobs(&self) -> Vec<Job> {
        self.jobs.filtered_jobs(&self.user_jobs)
    }

    pub async fn toggle_archive(&self, job: &JobId) -> ClientResult<UserJobMap> {
        self.user_jobs.toggle_archive(job).await
    }

    pub async fn generate_offer(&self, job: &JobId) -> ClientResult<String> {
        self.user_jobs.generate_offer(job).await
    }
}
