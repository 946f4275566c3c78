use thiserror::Error;

/// JSON-RPC and tool-envelope error codes shared by every backend.
pub mod codes {
    /// Payload could not be parsed.
    pub const PARSE_ERROR: i32 = -32700;
    /// Tool arguments are malformed or fail validation.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Tool (or server) does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Transport or backend failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// The tool ran and reported a logical failure (`isError: true`).
    pub const TOOL_EXECUTION_ERROR: i32 = -32000;
    /// No reply or poll result within the time budget.
    pub const REQUEST_TIMEOUT: i32 = -32001;
    /// The request was cancelled before completion.
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Worker sandbox RPC error.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Native host bridge error.
    #[error("Host bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Tool registration/execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Search index error.
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Database/migration error.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Errors raised by the worker sandbox RPC proxy.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// No reply arrived for the correlation id within the timeout.
    #[error("Request {request_id} timed out after {elapsed_ms}ms")]
    Timeout { request_id: String, elapsed_ms: u64 },

    /// The pending request was cancelled (proxy disposed while outstanding).
    #[error("Request {request_id} cancelled")]
    Cancelled { request_id: String },

    /// The proxy has been disposed and accepts no new calls.
    #[error("Worker proxy disposed")]
    Disposed,

    /// Sending to or receiving from the worker failed.
    #[error("Worker transport error: {0}")]
    Transport(String),

    /// The worker answered with an error reply.
    #[error("Worker error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
        retryable: bool,
    },

    /// The worker reply could not be interpreted.
    #[error("Invalid worker reply: {0}")]
    InvalidReply(String),
}

impl RpcError {
    /// Whether the retry policy may re-issue the call after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Timeout { .. } | RpcError::Transport(_) => true,
            RpcError::Remote { retryable, .. } => *retryable,
            RpcError::Cancelled { .. } | RpcError::Disposed | RpcError::InvalidReply(_) => false,
        }
    }

    /// JSON-RPC code used when this error lands in a tool envelope.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Timeout { .. } => codes::REQUEST_TIMEOUT,
            RpcError::Cancelled { .. } | RpcError::Disposed => codes::REQUEST_CANCELLED,
            RpcError::Transport(_) => codes::INTERNAL_ERROR,
            RpcError::Remote { code, .. } => *code,
            RpcError::InvalidReply(_) => codes::PARSE_ERROR,
        }
    }
}

/// Errors raised by the non-blocking native host bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No poll result was observed before the bridge timeout elapsed.
    #[error("Host request {request_id} timed out after {elapsed_ms}ms")]
    Timeout { request_id: String, elapsed_ms: u64 },

    /// The host refused or failed to start the operation.
    #[error("Host issue failed: {0}")]
    Issue(String),

    /// Polling the host for a result failed.
    #[error("Host poll failed for {request_id}: {message}")]
    Poll { request_id: String, message: String },

    /// The host returned a result that could not be interpreted.
    #[error("Invalid host result: {0}")]
    InvalidResult(String),
}

impl BridgeError {
    /// JSON-RPC code used when this error lands in a tool envelope.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::Timeout { .. } => codes::REQUEST_TIMEOUT,
            BridgeError::Issue(_) | BridgeError::Poll { .. } => codes::INTERNAL_ERROR,
            BridgeError::InvalidResult(_) => codes::PARSE_ERROR,
        }
    }
}

/// Tool execution errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool is unknown.
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// Tool call arguments are invalid.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Tool process or operation failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl ToolError {
    /// JSON-RPC code used when this error lands in a tool envelope.
    pub fn code(&self) -> i32 {
        match self {
            ToolError::NotFound(_) => codes::METHOD_NOT_FOUND,
            ToolError::InvalidArgs(_) => codes::INVALID_PARAMS,
            ToolError::ExecutionFailed(_) => codes::INTERNAL_ERROR,
        }
    }
}

/// Search index errors
#[derive(Debug, Error)]
pub enum SearchError {
    /// `initialize()` has not run yet.
    #[error("Search engine not initialized")]
    NotInitialized,

    /// No index exists for the requested store.
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    /// Indexing input was rejected.
    #[error("Index error: {0}")]
    Index(String),
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx operation error.
    #[error("SQLx error: {0}")]
    Sqlx(String),

    /// Migration execution error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row that cannot be decoded back into a message.
    #[error("Corrupt row '{id}': {reason}")]
    CorruptRow { id: String, reason: String },
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
