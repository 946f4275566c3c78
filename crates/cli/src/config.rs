use std::path::{Path, PathBuf};
use std::time::Duration;

use agent::OrchestratorOptions;
use host::BridgeOptions;
use proto::ConfigError;
use search::{Bm25Params, SearchOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;
use worker::{ProxyOptions, RetryOptions};

/// Top-level `toolmesh` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Worker sandbox process and RPC policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sandbox executable. No worker backend when unset.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Servers loaded inside the worker; each publishes its own tools.
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default = "default_worker_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_worker_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            servers: Vec::new(),
            timeout_ms: default_worker_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryOptions {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
        }
    }
}

/// Native host bridge endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Base URL of the host's issue/poll endpoints. No host backend when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_host_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_host_timeout_ms() -> u64 {
    10_000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_host_timeout_ms(),
        }
    }
}

impl HostConfig {
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// BM25 tuning, chunking and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
    #[serde(default = "default_lines_per_chunk")]
    pub lines_per_chunk: usize,
    /// `0` disables eviction.
    #[serde(default = "default_max_chunks_per_store")]
    pub max_chunks_per_store: usize,
    #[serde(default = "default_top_n")]
    pub default_top_n: usize,
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}

fn default_lines_per_chunk() -> usize {
    10
}

fn default_max_chunks_per_store() -> usize {
    10_000
}

fn default_top_n() -> usize {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            lines_per_chunk: default_lines_per_chunk(),
            max_chunks_per_store: default_max_chunks_per_store(),
            default_top_n: default_top_n(),
        }
    }
}

impl SearchConfig {
    pub fn bm25_params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
        }
    }

    pub fn search_options(&self, top_n: Option<usize>, threshold: Option<f32>) -> SearchOptions {
        SearchOptions {
            top_n: top_n.unwrap_or(self.default_top_n),
            threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
}

fn default_max_tool_result_chars() -> usize {
    agent::orchestrator::DEFAULT_MAX_TOOL_RESULT_CHARS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_result_chars: default_max_tool_result_chars(),
        }
    }
}

impl OrchestratorConfig {
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_tool_result_chars: self.max_tool_result_chars,
        }
    }
}

/// Database storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            url: format!("{home}/.toolmesh/conversations.db"),
        }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("config.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".toolmesh").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        if let Ok(command) = std::env::var("TOOLMESH_WORKER_COMMAND") {
            config.worker.command = Some(command);
        }
        if let Ok(url) = std::env::var("TOOLMESH_HOST_URL") {
            config.host.url = Some(url);
        }
        if let Ok(db) = std::env::var("TOOLMESH_DB") {
            config.database.url = db;
        }
        if let Ok(raw) = std::env::var("TOOLMESH_SEARCH_MAX_CHUNKS") {
            config.search.max_chunks_per_store =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "TOOLMESH_SEARCH_MAX_CHUNKS".to_string(),
                    reason: format!("'{raw}' is not a non-negative integer"),
                })?;
        }

        config.validate()?;
        debug!(
            worker = ?config.worker.command,
            host = ?config.host.url,
            db = %config.database.url,
            "Config loaded"
        );
        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.worker.servers.is_empty() && self.worker.command.is_none() {
            return Err(ConfigError::MissingField("worker.command".to_string()));
        }
        if self.worker.timeout_ms == 0 {
            return Err(invalid("worker.timeout_ms", "must be greater than zero"));
        }
        if self.worker.base_delay_ms > self.worker.max_delay_ms {
            return Err(invalid("worker.base_delay_ms", "must not exceed worker.max_delay_ms"));
        }
        if self.host.poll_interval_ms == 0 {
            return Err(invalid("host.poll_interval_ms", "must be greater than zero"));
        }
        if self.host.timeout_ms < self.host.poll_interval_ms {
            return Err(invalid("host.timeout_ms", "must be at least host.poll_interval_ms"));
        }
        if !(self.search.k1 > 0.0) {
            return Err(invalid("search.k1", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.search.b) {
            return Err(invalid("search.b", "must be within [0, 1]"));
        }
        if self.search.lines_per_chunk == 0 {
            return Err(invalid("search.lines_per_chunk", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
