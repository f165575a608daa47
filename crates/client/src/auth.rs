//! Auth state holder.
//!
//! Tokens are JWTs issued by the backend. The client never verifies their
//! signature (the backend does); it only reads `exp` to decide whether a token
//! is still worth presenting.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Edge-triggered notification of an auth state change.
///
/// An empty `token` means the session was cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub token: String,
    pub record: Option<Value>,
}

impl AuthChange {
    pub fn cleared() -> Self {
        Self {
            token: String::new(),
            record: None,
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    token: String,
    record: Option<Value>,
}

/// Holds the current token and auth record and broadcasts every change.
#[derive(Debug)]
pub struct AuthStore {
    state: RwLock<AuthState>,
    changes: broadcast::Sender<AuthChange>,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            state: RwLock::new(AuthState::default()),
            changes,
        }
    }

    pub fn save(&self, token: impl Into<String>, record: Option<Value>) {
        let token = token.into();
        if let Ok(mut state) = self.state.write() {
            state.token = token.clone();
            state.record = record.clone();
        }
        // No receivers is fine.
        let _ = self.changes.send(AuthChange { token, record });
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = AuthState::default();
        }
        let _ = self.changes.send(AuthChange::cleared());
    }

    pub fn token(&self) -> String {
        self.state.read().map(|s| s.token.clone()).unwrap_or_default()
    }

    pub fn record(&self) -> Option<Value> {
        self.state.read().ok().and_then(|s| s.record.clone())
    }

    /// A token is present and its `exp` lies in the future.
    pub fn is_valid(&self) -> bool {
        is_token_valid(&self.token())
    }

    /// Subscribe to changes made after this call.
    pub fn on_change(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Expiry of a JWT, read without signature verification.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    if token.is_empty() {
        return None;
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

pub fn is_token_valid(token: &str) -> bool {
    token_expiry(token).is_some_and(|exp| exp > Utc::now())
}
