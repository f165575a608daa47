//! `jobtrack-client`
//!
//! **Responsibility:** client-side state for the job tracker.
//!
//! This crate provides:
//! - The `Backend` seam with PocketBase (HTTP + realtime) and in-memory implementations
//! - Record caches kept in sync by realtime change events
//! - The derived, filterable job view
//! - The session binder that loads and clears stores on auth changes
//!
//! The backend stays the authority; nothing is persisted locally.

pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod cookie;
pub mod error;
pub mod jobs;
pub mod session;
pub mod sync;
pub mod user_jobs;
pub mod view;
pub mod workspace;

pub use auth::{AuthChange, AuthStore};
pub use backend::{Backend, InMemoryBackend, ListQuery, PocketBaseClient, SendResponse};
pub use config::ClientConfig;
pub use cookie::{CookieOptions, CookieSink, MemoryCookieJar};
pub use error::{ClientError, ClientResult};
pub use jobs::JobsStore;
pub use session::{SessionBinder, SessionState, Transition};
pub use sync::{SyncHandle, SyncLoop};
pub use user_jobs::UserJobsStore;
pub use view::{ArchiveView, JobFilter, RemoteFilter, derive_view};
pub use workspace::Workspace;
