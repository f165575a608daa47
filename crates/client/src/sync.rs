//! Dispatch loop.
//!
//! One task consumes the auth change stream and both record change streams
//! and processes each notification to completion before taking the next.

use std::sync::Arc;

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use jobtrack_events::{RecordEvent, Subscription};

use crate::auth::{AuthChange, AuthStore};
use crate::jobs::JobsStore;
use crate::session::{SessionBinder, Transition};
use crate::user_jobs::UserJobsStore;

pub struct SyncLoop {
    binder: Arc<SessionBinder>,
    jobs: Arc<JobsStore>,
    user_jobs: Arc<UserJobsStore>,
    auth: Arc<AuthStore>,
    auth_changes: broadcast::Receiver<AuthChange>,
    shutdown: Arc<Notify>,
    jobs_stream: Option<Subscription<RecordEvent>>,
    user_jobs_stream: Option<Subscription<RecordEvent>>,
}

/// Handle to a spawned [`SyncLoop`].
#[derive(Debug)]
pub struct SyncHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "sync loop task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl SyncLoop {
    /// Subscribes to `auth` immediately so no change made after this call is
    /// missed.
    pub fn new(
        binder: Arc<SessionBinder>,
        jobs: Arc<JobsStore>,
        user_jobs: Arc<UserJobsStore>,
        auth: Arc<AuthStore>,
    ) -> Self {
        let auth_changes = auth.on_change();
        Self {
            binder,
            jobs,
            user_jobs,
            auth,
            auth_changes,
            shutdown: Arc::new(Notify::new()),
            jobs_stream: None,
            user_jobs_stream: None,
        }
    }

    pub fn spawn(self) -> SyncHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        SyncHandle { shutdown, task }
    }

    /// Run until shut down.
    pub async fn run(mut self) {
        // Pick up a session that existed before the loop started.
        if !self.auth.token().is_empty() {
            let current = AuthChange {
                token: self.auth.token(),
                record: self.auth.record(),
            };
            self.on_auth_change(current).await;
        }

        let mut auth_open = true;
        let shutdown = self.shutdown.clone();

        loop {
            if !auth_open && self.jobs_stream.is_none() && self.user_jobs_stream.is_none() {
                break;
            }

            tokio::select! {
                _ = shutdown.notified() => break,

                change = self.auth_changes.recv(), if auth_open => match change {
                    Ok(change) => self.on_auth_change(change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "auth changes lagged, resyncing from current state");
                        let current = AuthChange {
                            token: self.auth.token(),
                            record: self.auth.record(),
                        };
                        self.on_auth_change(current).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => auth_open = false,
                },

                event = next_event(&mut self.jobs_stream) => match event {
                    Some(event) => {
                        self.jobs.apply_event(&event);
                    }
                    None => {
                        tracing::debug!("jobs stream ended");
                        self.jobs_stream = None;
                    }
                },

                event = next_event(&mut self.user_jobs_stream) => match event {
                    Some(event) => {
                        self.user_jobs.apply_event(&event);
                    }
                    None => {
                        tracing::debug!("user jobs stream ended");
                        self.user_jobs_stream = None;
                    }
                },
            }
        }

        tracing::info!("sync loop stopped");
    }

    async fn on_auth_change(&mut self, change: AuthChange) {
        match self.binder.handle(change).await {
            Ok(Transition::SignedIn(streams)) => {
                self.jobs_stream = Some(streams.jobs);
                self.user_jobs_stream = Some(streams.user_jobs);
            }
            Ok(Transition::SignedOut) => {
                self.jobs_stream = None;
                self.user_jobs_stream = None;
            }
            Ok(Transition::Refreshed | Transition::Unchanged) => {}
            Err(err) => tracing::error!(error = %err, "failed to apply auth change"),
        }
    }
}

/// Next event of an optional stream; never resolves when there is none.
async fn next_event(stream: &mut Option<Subscription<RecordEvent>>) -> Option<RecordEvent> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}
