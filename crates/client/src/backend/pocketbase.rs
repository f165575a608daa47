//! PocketBase HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use jobtrack_core::Filter;
use jobtrack_events::{RecordEvent, Subscription};

use super::realtime::{self, RealtimeManager};
use super::{Backend, ListQuery, SendResponse};
use crate::auth::AuthStore;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default)]
    record: Option<Value>,
}

pub struct PocketBaseClient {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Arc<AuthStore>,
    realtime: Arc<RealtimeManager>,
}

impl core::fmt::Debug for PocketBaseClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PocketBaseClient")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl PocketBaseClient {
    pub fn new(config: ClientConfig, auth: Arc<AuthStore>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let realtime = Arc::new(RealtimeManager::new(config.clone(), auth.clone())?);
        Ok(Self {
            http,
            config,
            auth,
            realtime,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth_store(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    /// Authenticate against an auth collection and store the session.
    ///
    /// Superusers authenticate against `_superusers`.
    pub async fn auth_with_password(
        &self,
        collection: &str,
        identity: &str,
        password: &str,
    ) -> ClientResult<Value> {
        let url = self
            .config
            .url(&format!("/api/collections/{collection}/auth-with-password"));
        let response = self
            .http
            .post(url)
            .json(&json!({"identity": identity, "password": password}))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            // PocketBase answers bad credentials with 400.
            let err = ClientError::from_response_body(status.as_u16(), &body);
            return Err(match err {
                ClientError::Api { message, .. } if status.as_u16() == 400 => ClientError::Unauthorized(message),
                other => other,
            });
        }

        let auth: AuthResponse = serde_json::from_value(body)?;
        tracing::info!(collection, "authenticated");
        self.auth.save(auth.token.clone(), auth.record.clone());
        Ok(auth.record.unwrap_or(Value::Null))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.request(method, self.config.url(path));
        let token = self.auth.token();
        if token.is_empty() {
            request
        } else {
            request.bearer_auth(token)
        }
    }

    async fn get_list(
        &self,
        collection: &str,
        page: usize,
        per_page: usize,
        query: &ListQuery,
    ) -> ClientResult<Vec<Value>> {
        let mut params: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("perPage", per_page.to_string()),
            ("skipTotal", "1".to_string()),
        ];
        if let Some(filter) = &query.filter {
            params.push(("filter", filter.to_query()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }

        let response = self
            .request(Method::GET, &records_path(collection))
            .query(&params)
            .send()
            .await?;
        let page: ListPage = serde_json::from_value(handle_response(response).await?)?;
        Ok(page.items)
    }
}

fn records_path(collection: &str) -> String {
    format!("/api/collections/{collection}/records")
}

async fn handle_response(response: reqwest::Response) -> ClientResult<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    if status.is_success() {
        Ok(body)
    } else {
        Err(ClientError::from_response_body(status.as_u16(), &body))
    }
}

#[async_trait]
impl Backend for PocketBaseClient {
    async fn get_full_list(&self, collection: &str, query: &ListQuery) -> ClientResult<Vec<Value>> {
        let per_page = self.config.page_size.max(1);
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let items = self.get_list(collection, page, per_page, query).await?;
            let short = items.len() < per_page;
            records.extend(items);
            if short {
                break;
            }
            page += 1;
        }
        tracing::debug!(collection, count = records.len(), "fetched full list");
        Ok(records)
    }

    async fn get_first(&self, collection: &str, filter: &Filter) -> ClientResult<Option<Value>> {
        let query = ListQuery::new().filter(filter.clone());
        let items = self.get_list(collection, 1, 1, &query).await?;
        Ok(items.into_iter().next())
    }

    async fn create(&self, collection: &str, body: &Value) -> ClientResult<Value> {
        let response = self
            .request(Method::POST, &records_path(collection))
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> ClientResult<Value> {
        let path = format!("{}/{}", records_path(collection), urlencoding::encode(id));
        let response = self.request(Method::PATCH, &path).json(patch).send().await?;
        handle_response(response).await
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> ClientResult<Subscription<RecordEvent>> {
        self.realtime
            .subscribe(realtime::topic(collection, filter))
            .await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> ClientResult<SendResponse> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(SendResponse { status, body })
    }
}
