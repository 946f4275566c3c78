//! Correlated RPC proxy over a single worker sandbox.
//!
//! Every call gets a fresh correlation id and a pending oneshot slot. A reader
//! task resolves slots as tagged replies arrive; replies for ids that are no
//! longer pending (timed out, cancelled) are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use proto::{RpcError, ToolDescriptor, WorkerFrame, WorkerReply, WorkerRequest};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::retry::RetryOptions;
use crate::transport::WorkerTransport;

/// Per-proxy call options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Per-attempt reply timeout.
    pub timeout: Duration,
    pub retry: RetryOptions,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            retry: RetryOptions::default(),
        }
    }
}

type PendingSlot = oneshot::Sender<Result<Value, RpcError>>;

struct Inner {
    transport: Arc<dyn WorkerTransport>,
    pending: DashMap<String, PendingSlot>,
    disposed: AtomicBool,
    options: ProxyOptions,
}

impl Inner {
    fn resolve(&self, reply: WorkerReply) {
        let Some(id) = reply.id.clone() else {
            debug!("Dropping worker reply without correlation id");
            return;
        };
        match self.pending.remove(&id) {
            Some((_, slot)) => {
                // Receiver may have dropped (caller gave up); that's fine.
                let _ = slot.send(reply.into_outcome());
            }
            None => debug!(request_id = %id, "Dropping stale worker reply (timed out or cancelled)"),
        }
    }

    fn fail_all(&self, make_err: impl Fn(&str) -> RpcError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(make_err(&id)));
                failed += 1;
            }
        }
        failed
    }
}

/// Releases a pending slot on every exit from `call_once`, including when
/// the caller's future is dropped mid-flight.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingSlot>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Owns one worker sandbox and turns wire messages into correlated calls.
pub struct WorkerRpcProxy {
    inner: Arc<Inner>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRpcProxy {
    /// Wraps a transport and its reply stream. Must be called inside a Tokio runtime.
    pub fn new(
        transport: Arc<dyn WorkerTransport>,
        mut replies: mpsc::Receiver<WorkerReply>,
        options: ProxyOptions,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            pending: DashMap::new(),
            disposed: AtomicBool::new(false),
            options,
        });

        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                reader_inner.resolve(reply);
            }
            let failed = reader_inner
                .fail_all(|_| RpcError::Transport("worker reply stream closed".to_string()));
            if failed > 0 {
                warn!(failed, "Worker reply stream closed with requests outstanding");
            }
        });

        Self {
            inner,
            reader: parking_lot::Mutex::new(Some(reader)),
        }
    }

    /// Options this proxy was built with.
    pub fn options(&self) -> ProxyOptions {
        self.inner.options
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns `true` once `dispose()` has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Sends a request and waits for its reply, retrying transient failures.
    pub async fn call(&self, request: WorkerRequest) -> Result<Value, RpcError> {
        let retry = self.inner.options.retry;
        let mut attempt: u32 = 0;
        loop {
            match self.call_once(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        kind = request.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Worker call failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, request: WorkerRequest) -> Result<Value, RpcError> {
        if self.is_disposed() {
            return Err(RpcError::Disposed);
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);
        let _slot = PendingGuard {
            pending: &self.inner.pending,
            id: &id,
        };

        // dispose() may have drained the map between the check and the insert.
        if self.is_disposed() {
            return Err(RpcError::Disposed);
        }

        let kind = request.kind();
        let frame = WorkerFrame {
            id: id.clone(),
            request,
        };
        self.inner.transport.send(&frame).await?;
        debug!(request_id = %id, kind, "Worker request sent");

        let started = Instant::now();
        match tokio::time::timeout(self.inner.options.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Cancelled {
                request_id: id.clone(),
            }),
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(request_id = %id, kind, elapsed_ms, "Worker request timed out");
                Err(RpcError::Timeout {
                    request_id: id.clone(),
                    elapsed_ms,
                })
            }
        }
    }

    /// Lists tools published by the worker, optionally for one server.
    pub async fn list_tools(&self, server_name: Option<&str>) -> Result<Vec<ToolDescriptor>, RpcError> {
        let value = self
            .call(WorkerRequest::ListTools {
                server_name: server_name.map(str::to_string),
            })
            .await?;
        parse_tool_list(value)
    }

    /// Invokes a tool inside the worker and returns its raw result.
    pub async fn call_tool(
        &self,
        server_name: Option<&str>,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, RpcError> {
        self.call(WorkerRequest::CallTool {
            server_name: server_name.map(str::to_string),
            tool_name: tool_name.to_string(),
            args,
        })
        .await
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<(), RpcError> {
        self.call(WorkerRequest::Ping).await.map(|_| ())
    }

    /// Asks the worker to load a named tool server.
    pub async fn load_server(&self, server_name: &str) -> Result<Value, RpcError> {
        self.call(WorkerRequest::LoadServer {
            server_name: server_name.to_string(),
        })
        .await
    }

    pub async fn sample_text(&self, server_name: Option<&str>, args: Value) -> Result<Value, RpcError> {
        self.call(WorkerRequest::SampleText {
            server_name: server_name.map(str::to_string),
            args,
        })
        .await
    }

    pub async fn get_service_context(&self, server_name: Option<&str>) -> Result<Value, RpcError> {
        self.call(WorkerRequest::GetServiceContext {
            server_name: server_name.map(str::to_string),
        })
        .await
    }

    pub async fn set_context(&self, server_name: Option<&str>, args: Value) -> Result<Value, RpcError> {
        self.call(WorkerRequest::SetContext {
            server_name: server_name.map(str::to_string),
            args,
        })
        .await
    }

    pub async fn switch_context(&self, server_name: Option<&str>, args: Value) -> Result<Value, RpcError> {
        self.call(WorkerRequest::SwitchContext {
            server_name: server_name.map(str::to_string),
            args,
        })
        .await
    }

    /// Terminates the sandbox and cancels every outstanding request.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.transport.terminate().await;
        let cancelled = self.inner.fail_all(|id| RpcError::Cancelled {
            request_id: id.to_string(),
        });
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        info!(cancelled, "Worker proxy disposed");
    }
}

impl Drop for WorkerRpcProxy {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Accepts either a bare array of catalog entries or `{ "tools": [...] }`.
fn parse_tool_list(value: Value) -> Result<Vec<ToolDescriptor>, RpcError> {
    let list = match value {
        Value::Object(mut map) => map.remove("tools").unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    serde_json::from_value(list).map_err(|e| RpcError::InvalidReply(format!("bad tool list: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::transport::{WorkerEndpoint, channel_pair};

    fn options(timeout_ms: u64, max_retries: u32) -> ProxyOptions {
        ProxyOptions {
            timeout: Duration::from_millis(timeout_ms),
            retry: RetryOptions {
                max_retries,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
            },
        }
    }

    fn proxy_with_endpoint(opts: ProxyOptions) -> (WorkerRpcProxy, WorkerEndpoint) {
        let (transport, endpoint, replies) = channel_pair(16);
        (WorkerRpcProxy::new(transport, replies, opts), endpoint)
    }

    #[tokio::test]
    async fn resolves_out_of_order_replies_by_correlation_id() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(1_000, 0));
        let worker = tokio::spawn(async move {
            let first = endpoint.requests.recv().await.expect("first frame");
            let second = endpoint.requests.recv().await.expect("second frame");
            for frame in [second, first] {
                let WorkerRequest::CallTool { tool_name, .. } = frame.request else {
                    panic!("unexpected request");
                };
                endpoint
                    .replies
                    .send(WorkerReply::ok(frame.id, json!(tool_name)))
                    .await
                    .expect("reply");
            }
        });

        let (a, b) = tokio::join!(
            proxy.call_tool(None, "alpha", json!({})),
            proxy.call_tool(None, "beta", json!({}))
        );
        assert_eq!(a.expect("alpha reply"), json!("alpha"));
        assert_eq!(b.expect("beta reply"), json!("beta"));
        assert_eq!(proxy.pending_count(), 0);
        worker.await.expect("worker task");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_drops_late_reply() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(500, 0));

        let err = proxy.ping().await.expect_err("no reply should time out");
        let late_id = match err {
            RpcError::Timeout {
                request_id,
                elapsed_ms,
            } => {
                assert!(elapsed_ms >= 500);
                request_id
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(proxy.pending_count(), 0);

        let stale = endpoint.requests.recv().await.expect("timed out frame");
        assert_eq!(stale.id, late_id);
        endpoint
            .replies
            .send(WorkerReply::ok(late_id.clone(), json!("late")))
            .await
            .expect("late reply");

        let answer = tokio::spawn(async move {
            let frame = endpoint.requests.recv().await.expect("fresh frame");
            endpoint
                .replies
                .send(WorkerReply::ok(frame.id.clone(), json!({"fresh": frame.id})))
                .await
                .expect("reply");
        });
        let value = proxy
            .call(WorkerRequest::GetServiceContext { server_name: None })
            .await
            .expect("fresh call resolves");
        assert_ne!(value["fresh"], json!(late_id));
        answer.await.expect("worker task");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors_with_fresh_ids() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(1_000, 3));
        let worker = tokio::spawn(async move {
            let mut seen = Vec::new();
            let first = endpoint.requests.recv().await.expect("first attempt");
            seen.push(first.id.clone());
            endpoint
                .replies
                .send(WorkerReply::err(first.id, -32603, "busy", true))
                .await
                .expect("reply");
            let second = endpoint.requests.recv().await.expect("second attempt");
            seen.push(second.id.clone());
            endpoint
                .replies
                .send(WorkerReply::ok(second.id, json!("done")))
                .await
                .expect("reply");
            seen
        });

        let value = proxy.load_server("files").await.expect("second attempt succeeds");
        assert_eq!(value, json!("done"));
        let seen = worker.await.expect("worker task");
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_semantic_errors() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(1_000, 3));
        let worker = tokio::spawn(async move {
            let frame = endpoint.requests.recv().await.expect("frame");
            endpoint
                .replies
                .send(WorkerReply::err(frame.id, -32601, "Tool 'nope' not found", false))
                .await
                .expect("reply");
            // Any further frame would be a retry.
            tokio::time::timeout(Duration::from_secs(5), endpoint.requests.recv())
                .await
                .ok()
                .flatten()
        });

        let err = proxy
            .call_tool(Some("files"), "nope", json!({}))
            .await
            .expect_err("semantic error surfaces");
        assert_eq!(err.code(), -32601);
        assert!(worker.await.expect("worker task").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_after_exhausting_retries() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(100, 2));
        let counter = tokio::spawn(async move {
            let mut frames = 0;
            while tokio::time::timeout(Duration::from_secs(5), endpoint.requests.recv())
                .await
                .ok()
                .flatten()
                .is_some()
            {
                frames += 1;
            }
            frames
        });

        let err = proxy.ping().await.expect_err("all attempts time out");
        assert!(matches!(err, RpcError::Timeout { .. }));
        drop(proxy);
        assert_eq!(counter.await.expect("counter task"), 3);
    }

    struct FlakyTransport {
        failures_left: AtomicUsize,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl WorkerTransport for FlakyTransport {
        async fn send(&self, _frame: &WorkerFrame) -> Result<(), RpcError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(RpcError::Transport("pipe closed".to_string()));
            }
            Err(RpcError::Transport("still closed".to_string()))
        }

        async fn terminate(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_then_surfaced() {
        let transport = Arc::new(FlakyTransport {
            failures_left: AtomicUsize::new(1),
            sends: AtomicUsize::new(0),
        });
        let (_reply_tx, reply_rx) = mpsc::channel(1);
        let proxy = WorkerRpcProxy::new(transport.clone(), reply_rx, options(100, 2));

        let err = proxy.ping().await.expect_err("transport never recovers");
        assert!(matches!(err, RpcError::Transport(msg) if msg == "still closed"));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
        assert_eq!(proxy.pending_count(), 0);
    }

    #[tokio::test]
    async fn dispose_cancels_outstanding_and_rejects_new_calls() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(60_000, 3));
        let proxy = Arc::new(proxy);

        let caller = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.ping().await })
        };
        endpoint.requests.recv().await.expect("frame sent");
        assert_eq!(proxy.pending_count(), 1);

        proxy.dispose().await;
        let err = caller.await.expect("caller task").expect_err("cancelled");
        assert!(matches!(err, RpcError::Cancelled { .. }));
        assert_eq!(proxy.pending_count(), 0);
        assert!(endpoint.requests.recv().await.is_none());

        let err = proxy.ping().await.expect_err("disposed");
        assert!(matches!(err, RpcError::Disposed));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_calls_release_their_pending_slots() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(60_000, 0));
        for _ in 0..3 {
            let outer = tokio::time::timeout(Duration::from_millis(50), proxy.ping()).await;
            assert!(outer.is_err(), "worker never replies");
            endpoint.requests.recv().await.expect("frame sent");
        }
        assert_eq!(proxy.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_reply_stream_fails_pending_requests() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(60_000, 0));
        let proxy = Arc::new(proxy);
        let caller = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.ping().await })
        };
        endpoint.requests.recv().await.expect("frame sent");
        drop(endpoint);

        let err = caller.await.expect("caller task").expect_err("stream closed");
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn list_tools_accepts_wrapped_and_bare_catalogs() {
        let (proxy, mut endpoint) = proxy_with_endpoint(options(1_000, 0));
        let worker = tokio::spawn(async move {
            let frame = endpoint.requests.recv().await.expect("frame");
            endpoint
                .replies
                .send(WorkerReply::ok(
                    frame.id,
                    json!({"tools": [{"name": "readFile", "description": "Read", "inputSchema": {"type": "object"}}]}),
                ))
                .await
                .expect("reply");
            let frame = endpoint.requests.recv().await.expect("frame");
            endpoint
                .replies
                .send(WorkerReply::ok(frame.id, json!([{"name": "grep"}])))
                .await
                .expect("reply");
        });

        let wrapped = proxy.list_tools(Some("files")).await.expect("wrapped list");
        assert_eq!(wrapped[0].name, "readFile");
        let bare = proxy.list_tools(None).await.expect("bare list");
        assert_eq!(bare[0].name, "grep");
        worker.await.expect("worker task");
    }
}
