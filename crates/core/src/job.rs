//! Job records (parsed vacancies).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::error::DomainResult;
use crate::id::{JobId, UserId};
use crate::timestamp;

/// Processing status of a job that is ready to be shown.
pub const STATUS_PROCESSED: &str = "processed";

/// A job record as stored in the `jobs` collection.
///
/// Only `id` is required on the wire; every other field defaults to empty so
/// partially-filled records (e.g. still being analyzed) still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,

    #[serde(default)]
    pub title: String,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub company: Option<String>,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub is_remote: bool,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub grade: Option<String>,

    /// Processing status (`processed` once analysis finished).
    #[serde(default)]
    pub status: String,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub owner: Option<UserId>,

    #[serde(default)]
    pub salary_min: Option<f64>,

    #[serde(default)]
    pub salary_max: Option<f64>,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub currency: Option<String>,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub location: Option<String>,

    #[serde(default, deserialize_with = "timestamp::null_as_empty")]
    pub skills: Vec<String>,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub original_text: String,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub channel_id: Option<String>,

    #[serde(default)]
    pub message_id: Option<i64>,

    /// Content hash used by the ingester for deduplication.
    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub hash: Option<String>,

    #[serde(default, with = "timestamp::optional")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp::optional")]
    pub updated: Option<DateTime<Utc>>,
}

impl Job {
    /// Minimal record, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<JobId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            company: None,
            description: None,
            is_remote: false,
            grade: None,
            status: STATUS_PROCESSED.to_string(),
            owner: None,
            salary_min: None,
            salary_max: None,
            currency: None,
            location: None,
            skills: Vec::new(),
            url: None,
            original_text: String::new(),
            channel_id: None,
            message_id: None,
            hash: None,
            created: None,
            updated: None,
        }
    }

    /// Decode a record received from the backend.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_processed(&self) -> bool {
        self.status == STATUS_PROCESSED
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> &JobId {
        &self.id
    }
}
