//! Strongly-typed record identifiers.
//!
//! Backend identifiers are short opaque strings (15 lowercase alphanumerics for
//! generated ids). They are kept as strings; the newtypes only stop a job id
//! from being passed where a user id is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a user record (session owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Identifier of a user-job association record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(String);

/// Length of identifiers generated locally (matches backend-generated ids).
pub const GENERATED_ID_LEN: usize = 15;

/// Generate a fresh backend-style identifier.
///
/// Takes the random tail of a UUIDv7 so ids stay lowercase hex.
pub fn generate_id() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    simple[simple.len() - GENERATED_ID_LEN..].to_string()
}

fn validate(raw: &str, name: &str) -> Result<(), DomainError> {
    if raw.is_empty() {
        return Err(DomainError::invalid_id(format!("{name}: empty")));
    }
    if let Some(c) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(DomainError::invalid_id(format!(
            "{name}: unexpected character {c:?} in {raw:?}"
        )));
    }
    Ok(())
}

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap an identifier without validation (trusted backend data).
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Generate a fresh identifier.
            pub fn generate() -> Self {
                Self(generate_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                validate(s, $name)?;
                Ok(Self(s.to_string()))
            }
        }
    };
}

impl_string_newtype!(UserId, "UserId");
impl_string_newtype!(JobId, "JobId");
impl_string_newtype!(MapId, "MapId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_backend_shape() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), GENERATED_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn parse_rejects_empty_and_quotes() {
        assert!("".parse::<UserId>().is_err());
        assert!("abc\"def".parse::<UserId>().is_err());
        assert_eq!("abc123".parse::<UserId>().unwrap().as_str(), "abc123");
    }
}
