//! Session binder.
//!
//! Two states, signed-out and signed-in, driven by auth change notifications.
//! Signing in records the session, mirrors it into the `pb_auth` cookie, loads
//! both stores and opens their change streams. Signing out closes the streams
//! and clears both stores.

use std::sync::{Arc, RwLock};

use jobtrack_core::{User, UserId};
use jobtrack_events::{RecordEvent, Subscription};

use crate::auth::{AuthChange, is_token_valid};
use crate::cookie::{CookieOptions, CookieSink, expired_cookie, export_cookie};
use crate::error::ClientResult;
use crate::jobs::JobsStore;
use crate::user_jobs::UserJobsStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn { user: User, token: String },
}

/// Change streams opened for a new session.
#[derive(Debug)]
pub struct SessionStreams {
    pub jobs: Subscription<RecordEvent>,
    pub user_jobs: Subscription<RecordEvent>,
}

/// Outcome of handling an auth change.
#[derive(Debug)]
pub enum Transition {
    /// A session started; the caller should consume the streams.
    SignedIn(SessionStreams),
    /// Same user, new token. Stores were left alone.
    Refreshed,
    /// The session ended and both stores were cleared.
    SignedOut,
    /// Nothing to do.
    Unchanged,
}

pub struct SessionBinder {
    jobs: Arc<JobsStore>,
    user_jobs: Arc<UserJobsStore>,
    cookies: Arc<dyn CookieSink>,
    cookie_options: CookieOptions,
    state: RwLock<SessionState>,
}

impl SessionBinder {
    pub fn new(
        jobs: Arc<JobsStore>,
        user_jobs: Arc<UserJobsStore>,
        cookies: Arc<dyn CookieSink>,
        cookie_options: CookieOptions,
    ) -> Self {
        Self {
            jobs,
            user_jobs,
            cookies,
            cookie_options,
            state: RwLock::new(SessionState::SignedOut),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn current_user(&self) -> Option<User> {
        match self.state() {
            SessionState::SignedIn { user, .. } => Some(user),
            SessionState::SignedOut => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state(), SessionState::SignedIn { .. })
    }

    /// React to an auth change.
    ///
    /// A valid token plus a user record that parses signs in; anything else,
    /// including a record that fails to parse, signs out. If loading or
    /// subscribing fails the session is rolled back to signed-out before the
    /// error is returned, so the next change for the same user starts over.
    pub async fn handle(&self, change: AuthChange) -> ClientResult<Transition> {
        let record = match change.record {
            Some(record) if !change.token.is_empty() && is_token_valid(&change.token) => record,
            _ => return Ok(self.sign_out()),
        };

        let user = match User::from_value(record.clone()) {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse auth record, signing out");
                return Ok(self.sign_out());
            }
        };

        if self.current_user().is_some_and(|current| current.id == user.id) {
            self.set_state(SessionState::SignedIn {
                user,
                token: change.token.clone(),
            });
            self.cookies
                .set_cookie(&export_cookie(&change.token, Some(&record), &self.cookie_options));
            tracing::debug!("session refreshed");
            return Ok(Transition::Refreshed);
        }

        if self.is_signed_in() {
            // Different user: tear the previous session down first.
            self.sign_out();
        }

        let user_id: UserId = user.id.clone();
        self.set_state(SessionState::SignedIn {
            user,
            token: change.token.clone(),
        });
        self.cookies
            .set_cookie(&export_cookie(&change.token, Some(&record), &self.cookie_options));
        tracing::info!(user = %user_id, "signed in");

        match self.open(&user_id).await {
            Ok(streams) => Ok(Transition::SignedIn(streams)),
            Err(err) => {
                tracing::warn!(user = %user_id, error = %err, "sign-in failed, rolling back");
                self.sign_out();
                Err(err)
            }
        }
    }

    async fn open(&self, user: &UserId) -> ClientResult<SessionStreams> {
        self.jobs.load(user).await?;
        self.user_jobs.load(user).await?;
        let jobs = self.jobs.subscribe().await?;
        let user_jobs = self.user_jobs.subscribe().await?;
        Ok(SessionStreams { jobs, user_jobs })
    }

    /// End the session. Both stores are cleared even when already signed out.
    pub fn sign_out(&self) -> Transition {
        let was_signed_in = self.is_signed_in();
        self.set_state(SessionState::SignedOut);
        self.jobs.clear();
        self.user_jobs.clear();

        if !was_signed_in {
            return Transition::Unchanged;
        }
        self.cookies.set_cookie(&expired_cookie(&self.cookie_options));
        tracing::info!("signed out");
        Transition::SignedOut
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::ClientConfig;
    use crate::cookie::MemoryCookieJar;
    use crate::error::ClientError;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    struct Harness {
        backend: Arc<InMemoryBackend>,
        jobs: Arc<JobsStore>,
        user_jobs: Arc<UserJobsStore>,
        cookies: Arc<MemoryCookieJar>,
        binder: SessionBinder,
    }

    fn harness() -> Harness {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .insert("jobs", json!({"id": "j1", "title": "Engineer", "status": "processed"}))
            .unwrap();
        backend
            .insert("user_job_map", json!({"user": "u1", "job": "j1", "archived": "2024-01-01 00:00:00.000Z"}))
            .unwrap();

        let jobs = Arc::new(JobsStore::new(backend.clone()));
        let user_jobs = Arc::new(UserJobsStore::new(backend.clone(), &ClientConfig::default()));
        let cookies = Arc::new(MemoryCookieJar::new());
        let binder = SessionBinder::new(
            jobs.clone(),
            user_jobs.clone(),
            cookies.clone(),
            CookieOptions::default(),
        );
        Harness {
            backend,
            jobs,
            user_jobs,
            cookies,
            binder,
        }
    }

    fn token(user: &str, ttl_secs: i64) -> String {
        encode(
            &Header::default(),
            &json!({"id": user, "exp": Utc::now().timestamp() + ttl_secs}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    fn change(user: &str, ttl_secs: i64) -> AuthChange {
        AuthChange {
            token: token(user, ttl_secs),
            record: Some(json!({"id": user, "email": format!("{user}@example.com")})),
        }
    }

    #[tokio::test]
    async fn sign_in_loads_stores_and_sets_cookie() {
        let h = harness();

        let transition = h.binder.handle(change("u1", 600)).await.unwrap();
        assert!(matches!(transition, Transition::SignedIn(_)));
        assert_eq!(h.jobs.len(), 1);
        assert_eq!(h.user_jobs.len(), 1);
        assert_eq!(h.binder.current_user().map(|u| u.id), Some(UserId::from("u1")));
        assert!(h.cookies.last().unwrap().starts_with("pb_auth=%7B"));
        assert_eq!(h.backend.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn sign_out_clears_both_caches() {
        let h = harness();
        let _streams = h.binder.handle(change("u1", 600)).await.unwrap();
        assert!(!h.jobs.is_empty());
        assert!(!h.user_jobs.is_empty());

        let transition = h.binder.handle(AuthChange::cleared()).await.unwrap();

        assert!(matches!(transition, Transition::SignedOut));
        assert!(h.jobs.is_empty());
        assert!(h.user_jobs.is_empty());
        assert_eq!(h.backend.subscriber_count(), 0);
        assert!(h.cookies.last().unwrap().starts_with("pb_auth=; "));
    }

    #[tokio::test]
    async fn expired_token_or_bad_record_signs_out() {
        let h = harness();
        let _streams = h.binder.handle(change("u1", 600)).await.unwrap();

        let expired = h.binder.handle(change("u1", -60)).await.unwrap();
        assert!(matches!(expired, Transition::SignedOut));
        assert!(h.jobs.is_empty());

        let bad = AuthChange {
            token: token("u1", 600),
            record: Some(json!({"email": "no-id@example.com"})),
        };
        assert!(matches!(h.binder.handle(bad).await.unwrap(), Transition::Unchanged));
        assert!(!h.binder.is_signed_in());
    }

    #[tokio::test]
    async fn same_user_refreshes_without_reloading() {
        let h = harness();
        let _streams = h.binder.handle(change("u1", 600)).await.unwrap();
        h.backend
            .insert("jobs", json!({"id": "j2", "title": "Designer", "status": "processed"}))
            .unwrap();

        let transition = h.binder.handle(change("u1", 1200)).await.unwrap();
        assert!(matches!(transition, Transition::Refreshed));
        // No reload happened, and nobody applied the event.
        assert_eq!(h.jobs.len(), 1);
        assert_eq!(h.cookies.all().len(), 2);
    }

    #[tokio::test]
    async fn failed_sign_in_rolls_back_and_the_next_change_retries() {
        let h = harness();
        h.backend.set_offline(true);

        let err = h.binder.handle(change("u1", 600)).await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert!(!h.binder.is_signed_in());
        assert!(h.jobs.session().is_none());
        assert!(h.user_jobs.session().is_none());
        assert_eq!(h.backend.subscriber_count(), 0);
        assert!(h.cookies.last().unwrap().starts_with("pb_auth=; "));

        h.backend.set_offline(false);
        let transition = h.binder.handle(change("u1", 600)).await.unwrap();

        assert!(matches!(transition, Transition::SignedIn(_)));
        assert_eq!(h.jobs.len(), 1);
        assert_eq!(h.user_jobs.len(), 1);
        assert_eq!(h.backend.subscriber_count(), 2);
    }
}
