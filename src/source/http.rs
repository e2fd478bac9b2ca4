//! HTTP long-poll event source
//!
//! Talks to a Bot-API style endpoint: `getUpdates` for batches and `getMe`
//! for the startup identity. Responses use the `{ "ok": bool, "result": ... }`
//! envelope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::domain::{Cursor, Event, Identity};
use crate::error::{PollmuxError, Result};
use crate::source::EventSource;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Largest batch the remote API will return
pub const MAX_BATCH_LIMIT: u32 = 100;

/// Configuration for the HTTP source
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    /// Client-side timeout per request. Must exceed the long-poll wait hint.
    pub request_timeout: Duration,
    /// Maximum events requested per fetch
    pub batch_limit: u32,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(40),
            batch_limit: MAX_BATCH_LIMIT,
        }
    }
}

/// Event source backed by the remote HTTP API
pub struct HttpEventSource {
    client: Client,
    token: String,
    config: HttpSourceConfig,
}

impl HttpEventSource {
    /// Create a source reading the token from the given environment variable
    pub fn from_env(token_env: &str, config: HttpSourceConfig) -> Result<Self> {
        let token = std::env::var(token_env)
            .map_err(|_| PollmuxError::Config(format!("{} not set", token_env)))?;
        Self::with_token(token, config)
    }

    /// Create a source with an explicit token
    pub fn with_token(token: String, config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PollmuxError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token,
            config,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn call(&self, method: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(self.method_url(method))
            .query(query)
            .send()
            .await
            .map_err(|e| PollmuxError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PollmuxError::Transport(format!(
                "{} returned {}: {}",
                method, status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PollmuxError::Protocol(format!("{} response is not JSON: {}", method, e)))?;

        unwrap_envelope(method, body)
    }
}

/// Strip the `{ ok, result }` envelope.
fn unwrap_envelope(method: &str, mut body: Value) -> Result<Value> {
    match body.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(body["result"].take()),
        Some(false) => {
            let description = body["description"].as_str().unwrap_or("no description");
            Err(PollmuxError::Protocol(format!("{} rejected: {}", method, description)))
        }
        None => Err(PollmuxError::Protocol(format!("{} response missing 'ok'", method))),
    }
}

/// Turn a `getUpdates` result into events sorted by `event_id`.
pub fn parse_updates(result: Value) -> Result<Vec<Event>> {
    let Value::Array(updates) = result else {
        return Err(PollmuxError::Protocol("updates result is not an array".to_string()));
    };

    let mut events = updates
        .into_iter()
        .map(|update| {
            let event_id = update
                .get("update_id")
                .and_then(Value::as_i64)
                .ok_or_else(|| PollmuxError::Protocol("update without integer update_id".to_string()))?;
            Ok(Event::new(event_id, update))
        })
        .collect::<Result<Vec<_>>>()?;

    events.sort_by_key(|e| e.event_id);
    Ok(events)
}

/// Turn a `getMe` result into an identity.
pub fn parse_identity(result: Value) -> Result<Identity> {
    let id = result
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| PollmuxError::Protocol("identity without integer id".to_string()))?;
    let name = result
        .get("username")
        .or_else(|| result.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(Identity::new(id, name))
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_events(&self, cursor: Cursor, wait_hint: Duration) -> Result<Vec<Event>> {
        let query = [
            ("offset", cursor.value().to_string()),
            ("timeout", wait_hint.as_secs().to_string()),
            ("limit", self.config.batch_limit.to_string()),
        ];
        let result = self.call("getUpdates", &query).await?;
        parse_updates(result)
    }

    async fn resolve_identity(&self) -> Result<Identity> {
        let result = self.call("getMe", &[]).await?;
        parse_identity(result)
    }
}

impl std::fmt::Debug for HttpEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEventSource")
            .field("base_url", &self.config.base_url)
            .field("batch_limit", &self.config.batch_limit)
            .finish()
    }
}
