//! `jobtrack-core`: domain records and predicates shared by the client layer.
//!
//! This crate contains **pure domain** primitives (no IO, no async).

pub mod entity;
pub mod error;
pub mod filter;
pub mod id;
pub mod job;
pub mod timestamp;
pub mod user;
pub mod user_job;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use filter::{Filter, FilterValue};
pub use id::{JobId, MapId, UserId};
pub use job::{Job, STATUS_PROCESSED};
pub use user::User;
pub use user_job::UserJobMap;

/// Backend collection names.
pub mod collections {
    pub const JOBS: &str = "jobs";
    pub const USER_JOB_MAP: &str = "user_job_map";
    pub const USERS: &str = "users";
    pub const SUPERUSERS: &str = "_superusers";
}
