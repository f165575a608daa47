//! Backend seam.
//!
//! Stores talk to the record service only through [`Backend`], so the same
//! store code runs against PocketBase over HTTP or against the in-memory
//! backend used by tests and tools.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use jobtrack_core::Filter;
use jobtrack_events::{RecordEvent, Subscription};

use crate::error::ClientResult;

pub mod memory;
pub mod pocketbase;
mod realtime;
pub mod sse;

pub use memory::InMemoryBackend;
pub use pocketbase::PocketBaseClient;

/// Options for a full-list read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Option<Filter>,
    /// Backend sort expression, e.g. `-created`.
    pub sort: Option<String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

/// Response of an opaque request.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResponse {
    pub status: u16,
    pub body: Value,
}

impl SendResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Every record of `collection` matching the query, across all pages.
    async fn get_full_list(&self, collection: &str, query: &ListQuery) -> ClientResult<Vec<Value>>;

    /// First record matching `filter`, if any.
    async fn get_first(&self, collection: &str, filter: &Filter) -> ClientResult<Option<Value>>;

    async fn create(&self, collection: &str, body: &Value) -> ClientResult<Value>;

    /// Partial update; fields absent from `patch` are left unchanged.
    async fn update(&self, collection: &str, id: &str, patch: &Value) -> ClientResult<Value>;

    /// Open a change stream for `collection`, optionally narrowed by `filter`.
    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> ClientResult<Subscription<RecordEvent>>;

    /// Authenticated request to an arbitrary path.
    ///
    /// Non-success statuses are returned, not turned into errors; transport
    /// failures are errors.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> ClientResult<SendResponse>;
}
