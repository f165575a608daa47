//! Authenticated user record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::UserId;

/// The auth record attached to a session.
///
/// Fields the client does not model are kept in `extra` so the record can be
/// written back (e.g. into the session cookie) unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub verified: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Decode an auth record. Records with an empty id are rejected.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        let user: User = serde_json::from_value(value)?;
        if user.id.as_str().is_empty() {
            return Err(DomainError::malformed("auth record has an empty id"));
        }
        Ok(user)
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_unmodelled_fields() {
        let raw = json!({
            "id": "u1",
            "email": "a@b.c",
            "collectionName": "users",
            "avatar": ""
        });
        let user = User::from_value(raw.clone()).unwrap();
        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(user.extra.get("collectionName"), Some(&json!("users")));
        assert_eq!(serde_json::to_value(&user).unwrap()["avatar"], json!(""));
    }

    #[test]
    fn rejects_missing_or_empty_id() {
        assert!(User::from_value(json!({"email": "a@b.c"})).is_err());
        assert!(User::from_value(json!({"id": ""})).is_err());
        assert!(User::from_value(json!(42)).is_err());
    }
}
