//! Per-user job state (archive flag, generated offer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::error::DomainResult;
use crate::id::{JobId, MapId, UserId};
use crate::timestamp;

/// Association between a user and a job (`user_job_map` collection).
///
/// At most one exists per (user, job) pair; `job` is the join key back to the
/// job record and is treated as stable once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJobMap {
    pub id: MapId,

    pub user: UserId,

    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub job: Option<JobId>,

    /// When the user archived the job; `None` means active.
    #[serde(default, with = "timestamp::optional")]
    pub archived: Option<DateTime<Utc>>,

    /// Generated outreach message for this job.
    #[serde(default, deserialize_with = "timestamp::empty_as_none")]
    pub offer: Option<String>,

    #[serde(default, with = "timestamp::optional")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp::optional")]
    pub updated: Option<DateTime<Utc>>,
}

impl UserJobMap {
    pub fn new(id: impl Into<MapId>, user: impl Into<UserId>, job: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            job: Some(job.into()),
            archived: None,
            offer: None,
            created: None,
            updated: None,
        }
    }

    /// Decode a record received from the backend.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }

    pub fn has_offer(&self) -> bool {
        self.offer.as_deref().is_some_and(|o| !o.is_empty())
    }
}

impl Entity for UserJobMap {
    type Id = MapId;

    fn id(&self) -> &MapId {
        &self.id
    }
}
