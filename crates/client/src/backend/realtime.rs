//! PocketBase realtime channel.
//!
//! One SSE connection per client carries every topic. The server hands out a
//! client id in its first `PB_CONNECT` event; the topic set is then replaced
//! wholesale with `POST /api/realtime`. Events are named after the topic they
//! match and carry `{action, record}`.
//!
//! The connection is opened lazily by the first subscription and dropped when
//! the last one is cancelled. It is not re-established if the server closes
//! it; open subscriptions simply end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use jobtrack_core::Filter;
use jobtrack_events::{RecordEvent, Subscription, SubscriptionHandle};

use super::sse::{SseEvent, SseParser};
use crate::auth::AuthStore;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

const REALTIME_PATH: &str = "/api/realtime";
const CONNECT_EVENT: &str = "PB_CONNECT";

/// Topic string for a collection subscription.
pub(crate) fn topic(collection: &str, filter: Option<&Filter>) -> String {
    let base = format!("{collection}/*");
    match filter {
        None => base,
        Some(filter) => {
            let options = json!({"query": {"filter": filter.to_query()}}).to_string();
            format!("{base}?options={}", urlencoding::encode(&options))
        }
    }
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<RecordEvent>,
}

#[derive(Default)]
struct Inner {
    client_id: Option<String>,
    listeners: HashMap<String, Vec<Listener>>,
    next_listener: u64,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    pending_connect: Option<oneshot::Sender<String>>,
}

impl Inner {
    fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.listeners.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.client_id = None;
        self.pending_connect = None;
        self.generation += 1;
    }
}

pub(crate) struct RealtimeManager {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Arc<AuthStore>,
    inner: Arc<Mutex<Inner>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl RealtimeManager {
    pub(crate) fn new(config: ClientConfig, auth: Arc<AuthStore>) -> ClientResult<Self> {
        // No overall timeout: the event stream stays open indefinitely.
        let http = reqwest::Client::builder()
            .connect_timeout(config.realtime_connect_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            auth,
            inner: Arc::new(Mutex::new(Inner::default())),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> ClientResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ClientError::Realtime("realtime state poisoned".to_string()))
    }

    pub(crate) async fn subscribe(self: &Arc<Self>, topic: String) -> ClientResult<Subscription<RecordEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = {
            let mut inner = self.lock()?;
            inner.next_listener += 1;
            let id = inner.next_listener;
            inner
                .listeners
                .entry(topic.clone())
                .or_default()
                .push(Listener { id, sender: tx });
            id
        };

        let registered = async {
            let client_id = self.ensure_connected().await?;
            self.post_subscriptions(&client_id).await
        }
        .await;

        if let Err(err) = registered {
            self.remove_listener(&topic, listener_id);
            return Err(err);
        }

        tracing::debug!(topic = %topic, "realtime subscription registered");

        let manager = Arc::downgrade(self);
        let handle = SubscriptionHandle::new(move || release(manager, topic, listener_id));
        Ok(Subscription::new(rx, handle))
    }

    /// Drop a listener. Returns true when its topic has no listeners left.
    fn remove_listener(&self, topic: &str, listener_id: u64) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let Some(listeners) = inner.listeners.get_mut(topic) else {
            return false;
        };
        listeners.retain(|l| l.id != listener_id);
        if listeners.is_empty() {
            inner.listeners.remove(topic);
            return true;
        }
        false
    }

    /// Re-post the current topic set, or drop the connection if it is empty.
    async fn resync(&self) {
        let client_id = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.listeners.is_empty() {
                inner.disconnect();
                tracing::debug!("realtime connection closed, no topics left");
                return;
            }
            inner.client_id.clone()
        };

        if let Some(client_id) = client_id {
            if let Err(err) = self.post_subscriptions(&client_id).await {
                tracing::warn!(error = %err, "failed to update realtime subscriptions");
            }
        }
    }

    async fn ensure_connected(&self) -> ClientResult<String> {
        let _guard = self.connect_lock.lock().await;

        let (connected, generation) = {
            let mut inner = self.lock()?;
            if let Some(id) = inner.client_id.clone() {
                if inner.reader.as_ref().is_some_and(|r| !r.is_finished()) {
                    return Ok(id);
                }
            }
            inner.disconnect();
            let (tx, rx) = oneshot::channel();
            inner.pending_connect = Some(tx);
            (rx, inner.generation)
        };

        let response = self
            .http
            .get(self.config.url(REALTIME_PATH))
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(ClientError::from_response_body(status.as_u16(), &body));
        }

        let reader = tokio::spawn(read_events(
            response,
            Arc::downgrade(&self.inner),
            generation,
        ));
        self.lock()?.reader = Some(reader);

        match tokio::time::timeout(self.config.realtime_connect_timeout, connected).await {
            Ok(Ok(client_id)) => {
                tracing::info!(client_id = %client_id, "realtime connected");
                Ok(client_id)
            }
            Ok(Err(_)) => Err(ClientError::Realtime(
                "connection closed before PB_CONNECT".to_string(),
            )),
            Err(_) => {
                self.lock()?.disconnect();
                Err(ClientError::Realtime("timed out waiting for PB_CONNECT".to_string()))
            }
        }
    }

    async fn post_subscriptions(&self, client_id: &str) -> ClientResult<()> {
        let topics = self.lock()?.topics();
        let mut request = self
            .http
            .post(self.config.url(REALTIME_PATH))
            .timeout(self.config.request_timeout)
            .json(&json!({"clientId": client_id, "subscriptions": topics}));
        let token = self.auth.token();
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Err(ClientError::from_response_body(status.as_u16(), &body))
    }
}

fn release(manager: Weak<RealtimeManager>, topic: String, listener_id: u64) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    if !manager.remove_listener(&topic, listener_id) {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { manager.resync().await });
        }
        Err(_) => {
            // Outside a runtime the server-side topic lingers until the
            // connection closes.
            if let Ok(mut inner) = manager.inner.lock() {
                if inner.listeners.is_empty() {
                    inner.disconnect();
                }
            }
        }
    }
}

async fn read_events(response: reqwest::Response, inner: Weak<Mutex<Inner>>, generation: u64) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, "realtime stream failed");
                break;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        for event in parser.feed(&chunk) {
            dispatch(&inner, generation, event);
        }
    }

    tracing::info!("realtime stream ended");
    if let Some(inner) = inner.upgrade() {
        if let Ok(mut inner) = inner.lock() {
            if inner.generation == generation {
                inner.client_id = None;
                inner.pending_connect = None;
                inner.reader = None;
                // Dropping the senders ends every open subscription.
                inner.listeners.clear();
            }
        }
    }
}

fn dispatch(inner: &Mutex<Inner>, generation: u64, event: SseEvent) {
    let Ok(mut inner) = inner.lock() else {
        return;
    };
    if inner.generation != generation {
        return;
    }

    if event.event == CONNECT_EVENT {
        let client_id = serde_json::from_str::<Value>(&event.data)
            .ok()
            .and_then(|v| v.get("clientId").and_then(Value::as_str).map(str::to_string));
        match client_id {
            Some(client_id) => {
                inner.client_id = Some(client_id.clone());
                if let Some(pending) = inner.pending_connect.take() {
                    let _ = pending.send(client_id);
                }
            }
            None => tracing::warn!(data = %event.data, "PB_CONNECT without clientId"),
        }
        return;
    }

    let Some(listeners) = inner.listeners.get_mut(&event.event) else {
        return;
    };
    let parsed: RecordEvent = match serde_json::from_str(&event.data) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(topic = %event.event, error = %err, "dropping malformed realtime event");
            return;
        }
    };
    listeners.retain(|l| l.sender.send(parsed.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_carry_url_encoded_filter_options() {
        assert_eq!(topic("jobs", None), "jobs/*");
        assert_eq!(
            topic("user_job_map", Some(&Filter::eq("user", "u1"))),
            "user_job_map/*?options=%7B%22query%22%3A%7B%22filter%22%3A%22user%20%3D%20%5C%22u1%5C%22%22%7D%7D"
        );
    }

    #[test]
    fn connect_event_resolves_pending_client_id() {
        let inner = Mutex::new(Inner::default());
        let (tx, mut rx) = oneshot::channel();
        inner.lock().unwrap().pending_connect = Some(tx);

        dispatch(
            &inner,
            0,
            SseEvent {
                event: CONNECT_EVENT.into(),
                data: r#"{"clientId":"c1"}"#.into(),
                id: None,
            },
        );

        assert_eq!(rx.try_recv().unwrap(), "c1");
        assert_eq!(inner.lock().unwrap().client_id.as_deref(), Some("c1"));
    }

    #[test]
    fn events_are_routed_by_topic_name() {
        let inner = Mutex::new(Inner::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        inner
            .lock()
            .unwrap()
            .listeners
            .insert("jobs/*".into(), vec![Listener { id: 1, sender: tx }]);

        let event = |name: &str, data: &str| SseEvent {
            event: name.into(),
            data: data.into(),
            id: None,
        };
        dispatch(&inner, 0, event("jobs/*", r#"{"action":"create","record":{"id":"j1"}}"#));
        dispatch(&inner, 0, event("other/*", r#"{"action":"create","record":{"id":"x"}}"#));
        dispatch(&inner, 0, event("jobs/*", "not json"));
        // Stale connection generation.
        dispatch(&inner, 7, event("jobs/*", r#"{"action":"delete","record":{"id":"j1"}}"#));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.record_id(), Some("j1"));
        assert!(rx.try_recv().is_err());
    }
}
