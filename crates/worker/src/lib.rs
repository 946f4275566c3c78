//! Worker sandbox RPC: correlated request/reply proxy with timeout and retry,
//! plus the transports that carry frames across the sandbox boundary.

pub mod proxy;
pub mod retry;
pub mod transport;

/// Re-export of the RPC proxy and its options.
pub use proxy::{ProxyOptions, WorkerRpcProxy};
/// Re-export of retry policy options.
pub use retry::RetryOptions;
/// Re-export of worker transports.
pub use transport::{ChannelWorker, ProcessWorker, WorkerEndpoint, WorkerTransport, channel_pair};
