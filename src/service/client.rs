use std::future::Future;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::config::WatchConfig;
use crate::core::error::DispatchError;
use crate::core::models::Payload;

pub type DispatchResult = Result<Payload, DispatchError>;

/// Sends a canonical path to the processing service.
///
/// One attempt per call, no retries. Implementations must not touch the disk.
pub trait Dispatch: Send + Sync {
    fn dispatch(
        &self,
        canonical_path: &str,
    ) -> impl Future<Output = DispatchResult> + Send;
}

/// `POST {service_url}` with `{"filename": <canonical path>}`.
#[derive(Debug, Clone)]
pub struct HttpDispatchClient {
    http: Client,
    service_url: String,
}

impl HttpDispatchClient {
    pub fn new(config: &WatchConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            service_url: config.service_url.clone(),
        })
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }
}

impl Dispatch for HttpDispatchClient {
    async fn dispatch(&self, canonical_path: &str) -> DispatchResult {
        debug!(url = %self.service_url, path = %canonical_path, "Dispatching to service");

        let response = self
            .http
            .post(&self.service_url)
            .json(&json!({ "filename": canonical_path }))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Transport(format!(
                "service responded with {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to read body: {e}")))?;

        parse_payload(&body)
    }
}

/// Strict parse of a response body into a JSON object.
pub fn parse_payload(body: &str) -> DispatchResult {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DispatchError::MalformedResponse(format!(
            "expected a JSON object, got `{}`",
            truncate(&other.to_string(), 80)
        ))),
        Err(e) => Err(DispatchError::MalformedResponse(e.to_string())),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
