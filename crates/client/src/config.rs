//! Client configuration.

use std::time::Duration;

use crate::cookie::CookieOptions;
use crate::error::{ClientError, ClientResult};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8090";
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_OFFER_PATH: &str = "/api/jobs/{id}/generate-offer";

pub const ENV_BASE_URL: &str = "JOBTRACK_PB_URL";
pub const ENV_PAGE_SIZE: &str = "JOBTRACK_PAGE_SIZE";
pub const ENV_TIMEOUT_SECS: &str = "JOBTRACK_TIMEOUT_SECS";

/// Settings shared by every backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin, without a trailing slash.
    pub base_url: String,
    /// Page size used by full-list reads.
    pub page_size: usize,
    pub request_timeout: Duration,
    /// How long to wait for the realtime channel to hand out a client id.
    pub realtime_connect_timeout: Duration,
    /// Path template of the offer endpoint; `{id}` is replaced by the job id.
    pub offer_path: String,
    pub cookie: CookieOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            realtime_connect_timeout: Duration::from_secs(10),
            offer_path: DEFAULT_OFFER_PATH.to_string(),
            cookie: CookieOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Load overrides from the process environment.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config = config.with_base_url(url.trim());
        }

        if let Some(raw) = lookup(ENV_PAGE_SIZE) {
            let size: usize = raw
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_PAGE_SIZE, &raw))?;
            if size == 0 {
                return Err(invalid(ENV_PAGE_SIZE, &raw));
            }
            config.page_size = size;
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_TIMEOUT_SECS, &raw))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Absolute URL for a backend path (`/api/...`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn offer_path_for(&self, job_id: &str) -> String {
        self.offer_path.replace("{id}", &urlencoding::encode(job_id))
    }
}

fn invalid(key: &str, raw: &str) -> ClientError {
    jobtrack_core::DomainError::validation(format!("{key} has invalid value {raw:?}")).into()
}
