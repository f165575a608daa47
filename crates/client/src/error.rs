//! Client error model.

use jobtrack_core::DomainError;
use serde_json::Value;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Missing or rejected credentials.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// An operation needing a session was called while signed out.
    #[error("no active session")]
    NotSignedIn,

    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        data: Value,
    },

    /// A response or event had an unexpected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The realtime channel failed.
    #[error("realtime error: {0}")]
    Realtime(String),

    /// A shared state lock was poisoned by a panicking writer.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Build an error from a backend error body (`{status, message, data}`).
    pub fn from_response_body(status: u16, body: &Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        if status == 401 || status == 403 {
            return Self::Unauthorized(message);
        }
        Self::Api { status, message, data }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized(_) => Some(401),
            _ => None,
        }
    }

    /// True when the backend rejected a write because a unique index already
    /// holds a matching record.
    pub fn is_not_unique(&self) -> bool {
        let Self::Api { status: 400, data, .. } = self else {
            return false;
        };
        let Some(fields) = data.as_object() else {
            return false;
        };
        fields.values().any(|field| {
            field.get("code").and_then(Value::as_str) == Some("validation_not_unique")
        })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
