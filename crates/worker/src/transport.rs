//! Transports carrying request frames into a worker sandbox and replies out of it.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use proto::{RpcError, WorkerFrame, WorkerReply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const REPLY_BUFFER: usize = 64;

/// Outbound half of a worker boundary.
///
/// Replies are not returned from `send`; they arrive on the
/// `mpsc::Receiver<WorkerReply>` handed to the proxy at construction.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Delivers one request frame to the worker.
    async fn send(&self, frame: &WorkerFrame) -> Result<(), RpcError>;
    /// Shuts the worker down. Later `send`s fail.
    async fn terminate(&self);
}

/// Worker sandbox running as a child process speaking newline-delimited JSON.
pub struct ProcessWorker {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ProcessWorker {
    /// Spawns `command args...` and starts reading replies from its stdout.
    pub fn spawn(
        command: &str,
        args: &[String],
    ) -> Result<(Arc<Self>, mpsc::Receiver<WorkerReply>), RpcError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| RpcError::Transport(format!("failed to spawn worker '{command}': {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Transport("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Transport("worker stdout unavailable".to_string()))?;

        info!(command, pid = ?child.id(), "Worker process started");

        let (tx, rx) = mpsc::channel(REPLY_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WorkerReply>(line) {
                            Ok(reply) if reply.id.is_some() => {
                                if tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => debug!("Skipping worker line without id"),
                            Err(e) => debug!("Skipping non-reply worker line: {e}"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Worker stdout read failed: {e}");
                        break;
                    }
                }
            }
            debug!("Worker stdout closed");
        });

        Ok((
            Arc::new(Self {
                stdin: tokio::sync::Mutex::new(Some(stdin)),
                child: tokio::sync::Mutex::new(Some(child)),
            }),
            rx,
        ))
    }
}

#[async_trait]
impl WorkerTransport for ProcessWorker {
    async fn send(&self, frame: &WorkerFrame) -> Result<(), RpcError> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| RpcError::Transport(format!("failed to encode frame: {e}")))?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| RpcError::Transport("worker terminated".to_string()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RpcError::Transport(format!("worker write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| RpcError::Transport(format!("worker flush failed: {e}")))
    }

    async fn terminate(&self) {
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill worker process: {e}");
            } else {
                info!("Worker process terminated");
            }
        }
    }
}

/// In-memory transport for workers running in the same process.
pub struct ChannelWorker {
    requests: parking_lot::Mutex<Option<mpsc::Sender<WorkerFrame>>>,
}

/// Worker-side half of an in-memory transport.
pub struct WorkerEndpoint {
    /// Frames sent by the proxy; yields `None` once the transport terminates.
    pub requests: mpsc::Receiver<WorkerFrame>,
    /// Replies routed back to the proxy.
    pub replies: mpsc::Sender<WorkerReply>,
}

/// Creates a connected in-memory transport, its worker endpoint, and the reply stream for the proxy.
pub fn channel_pair(buffer: usize) -> (Arc<ChannelWorker>, WorkerEndpoint, mpsc::Receiver<WorkerReply>) {
    let (req_tx, req_rx) = mpsc::channel(buffer);
    let (reply_tx, reply_rx) = mpsc::channel(buffer);
    (
        Arc::new(ChannelWorker {
            requests: parking_lot::Mutex::new(Some(req_tx)),
        }),
        WorkerEndpoint {
            requests: req_rx,
            replies: reply_tx,
        },
        reply_rx,
    )
}

#[async_trait]
impl WorkerTransport for ChannelWorker {
    async fn send(&self, frame: &WorkerFrame) -> Result<(), RpcError> {
        let sender = self
            .requests
            .lock()
            .clone()
            .ok_or_else(|| RpcError::Transport("worker terminated".to_string()))?;
        sender
            .send(frame.clone())
            .await
            .map_err(|_| RpcError::Transport("worker channel closed".to_string()))
    }

    async fn terminate(&self) {
        self.requests.lock().take();
    }
}
