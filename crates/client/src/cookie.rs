//! `pb_auth` session cookie export.
//!
//! The cookie carries the URL-encoded JSON `{"token": ..., "record": ...}` so a
//! server-side renderer sharing the origin can reuse the session.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::auth::token_expiry;

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub name: String,
    pub path: String,
    pub same_site: String,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "pb_auth".to_string(),
            path: "/".to_string(),
            same_site: "Strict".to_string(),
            secure: true,
            http_only: false,
        }
    }
}

/// Receives `Set-Cookie` header values.
pub trait CookieSink: Send + Sync {
    fn set_cookie(&self, header: &str);
}

/// Cookie sink that keeps every header it was handed.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    headers: Mutex<Vec<String>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently set header.
    pub fn last(&self) -> Option<String> {
        self.headers.lock().ok().and_then(|h| h.last().cloned())
    }

    pub fn all(&self) -> Vec<String> {
        self.headers.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl CookieSink for MemoryCookieJar {
    fn set_cookie(&self, header: &str) {
        if let Ok(mut headers) = self.headers.lock() {
            headers.push(header.to_string());
        }
    }
}

/// Build the `Set-Cookie` value for a session.
///
/// `Expires` follows the token's `exp` claim; a token without one yields an
/// already-expired cookie.
pub fn export_cookie(token: &str, record: Option<&Value>, opts: &CookieOptions) -> String {
    let payload = json!({
        "token": token,
        "record": record.cloned().unwrap_or(Value::Null),
    });
    let expires = token_expiry(token).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    serialize(opts, &urlencoding::encode(&payload.to_string()), expires)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_cookie(opts: &CookieOptions) -> String {
    serialize(opts, "", DateTime::<Utc>::UNIX_EPOCH)
}

/// Read a session back from a `Cookie` request header.
pub fn load_from_cookie(header: &str, opts: &CookieOptions) -> Option<(String, Option<Value>)> {
    let raw = header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == opts.name).then_some(value)
    })?;
    let decoded = urlencoding::decode(raw).ok()?;
    let payload: Value = serde_json::from_str(&decoded).ok()?;
    let token = payload.get("token")?.as_str()?.to_string();
    let record = payload.get("record").filter(|r| !r.is_null()).cloned();
    Some((token, record))
}

fn serialize(opts: &CookieOptions, value: &str, expires: DateTime<Utc>) -> String {
    let mut header = format!(
        "{}={}; Path={}; Expires={}",
        opts.name,
        value,
        opts.path,
        expires.format(EXPIRES_FORMAT)
    );
    if opts.http_only {
        header.push_str("; HttpOnly");
    }
    if opts.secure {
        header.push_str("; Secure");
    }
    if !opts.same_site.is_empty() {
        header.push_str("; SameSite=");
        header.push_str(&opts.same_site);
    }
    header
}
