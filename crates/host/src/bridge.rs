use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::{BridgeError, ToolDescriptor};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Invocation channel exposed by the native host.
///
/// `issue` must return immediately with an opaque request id. `poll` returns
/// `None` until the result is available and must stay idempotent.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Starts `op` on the host and returns its request id.
    async fn issue(&self, op: &str, params: Value) -> Result<String, BridgeError>;
    /// Fetches the result for `request_id`, `None` while still running.
    async fn poll(&self, request_id: &str) -> Result<Option<String>, BridgeError>;
}

/// Fixed polling cadence and budget of one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Lifecycle of one polled host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Still waiting; `polls` results observed as null so far.
    Pending { polls: u32 },
    Resolved(String),
    TimedOut { elapsed: Duration },
}

impl PollState {
    /// Folds one poll observation taken at `elapsed` into the state.
    ///
    /// A result observed after the budget has elapsed does not count.
    pub fn observe(self, observed: Option<String>, elapsed: Duration, timeout: Duration) -> PollState {
        match self {
            PollState::Pending { polls } => match observed {
                Some(value) if elapsed <= timeout => PollState::Resolved(value),
                _ if elapsed >= timeout => PollState::TimedOut { elapsed },
                _ => PollState::Pending { polls: polls + 1 },
            },
            done => done,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PollState::Pending { .. })
    }
}

/// Issue-then-poll bridge to the native host.
#[derive(Clone)]
pub struct HostBridge {
    channel: Arc<dyn HostChannel>,
    options: BridgeOptions,
}

impl HostBridge {
    pub fn new(channel: Arc<dyn HostChannel>, options: BridgeOptions) -> Self {
        Self { channel, options }
    }

    pub fn options(&self) -> BridgeOptions {
        self.options
    }

    /// Issues `op` and polls until a result arrives or the timeout elapses.
    ///
    /// A timed-out request is abandoned; the host may still complete it.
    pub async fn invoke(&self, op: &str, params: Value) -> Result<String, BridgeError> {
        let request_id = self.channel.issue(op, params).await?;
        let started = Instant::now();
        debug!(request_id = %request_id, op, "Host request issued");

        let mut state = PollState::Pending { polls: 0 };
        loop {
            let remaining = self.options.timeout.saturating_sub(started.elapsed());
            let observed = match tokio::time::timeout(remaining, self.channel.poll(&request_id)).await {
                Ok(result) => result?,
                Err(_) => None,
            };
            state = state.observe(observed, started.elapsed(), self.options.timeout);

            match state {
                PollState::Pending { polls } => {
                    debug!(request_id = %request_id, polls, "Host result not ready");
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                PollState::Resolved(value) => {
                    debug!(
                        request_id = %request_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Host request resolved"
                    );
                    return Ok(value);
                }
                PollState::TimedOut { elapsed } => {
                    let elapsed_ms = elapsed.as_millis() as u64;
                    warn!(request_id = %request_id, op, elapsed_ms, "Host request timed out");
                    return Err(BridgeError::Timeout {
                        request_id,
                        elapsed_ms,
                    });
                }
            }
        }
    }

    /// Fetches the host's tool catalog via the `listTools` operation.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        let raw = self.invoke("listTools", Value::Object(Default::default())).await?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::InvalidResult(format!("tool list is not JSON: {e}")))?;
        let list = match value {
            Value::Object(mut map) => map.remove("tools").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        serde_json::from_value(list)
            .map_err(|e| BridgeError::InvalidResult(format!("bad tool list: {e}")))
    }

    /// Runs a host tool via the `callTool` operation and returns its raw result string.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<String, BridgeError> {
        self.invoke(
            "callTool",
            serde_json::json!({ "toolName": tool_name, "args": args }),
        )
        .await
    }
}
