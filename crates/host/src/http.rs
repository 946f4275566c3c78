//! HTTP implementation of the host invocation channel.
//!
//! `POST {base}/issue` with `{op, params}` answers `{requestId}`;
//! `GET {base}/poll/{requestId}` answers `{result}` where `result` is null
//! until the operation completes.

use async_trait::async_trait;
use proto::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::bridge::HostChannel;

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    op: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    result: Option<String>,
}

/// Host channel reached over HTTP.
pub struct HttpHostChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHostChannel {
    /// Creates a channel for the host listening at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/poll/{request_id}` with the id percent-encoded as one segment.
    fn poll_url(&self, request_id: &str) -> Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("base url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .push("poll")
            .push(request_id);
        Ok(url)
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl HostChannel for HttpHostChannel {
    async fn issue(&self, op: &str, params: Value) -> Result<String, BridgeError> {
        let url = format!("{}/issue", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&IssueRequest { op, params })
            .send()
            .await
            .map_err(|e| BridgeError::Issue(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Issue(e.to_string()))?;
        if !status.is_success() {
            return Err(BridgeError::Issue(format!("HTTP {status}: {}", preview(&body))));
        }

        let parsed: IssueResponse = serde_json::from_str(&body).map_err(|e| {
            BridgeError::InvalidResult(format!("issue response: {e}; body: {}", preview(&body)))
        })?;
        debug!(op, request_id = %parsed.request_id, "Host accepted request");
        Ok(parsed.request_id)
    }

    async fn poll(&self, request_id: &str) -> Result<Option<String>, BridgeError> {
        let poll_err = |message: String| BridgeError::Poll {
            request_id: request_id.to_string(),
            message,
        };
        let url = self.poll_url(request_id).map_err(poll_err)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| poll_err(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| poll_err(e.to_string()))?;
        if !status.is_success() {
            return Err(poll_err(format!("HTTP {status}: {}", preview(&body))));
        }

        let parsed: PollResponse = serde_json::from_str(&body).map_err(|e| {
            BridgeError::InvalidResult(format!("poll response: {e}; body: {}", preview(&body)))
        })?;
        Ok(parsed.result)
    }
}
