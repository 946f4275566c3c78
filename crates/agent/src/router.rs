//! Merged tool namespace over worker, host and local backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use host::HostBridge;
use parking_lot::{Mutex, RwLock};
use proto::{BackendKind, ToolCall, ToolDescriptor, ToolResult, codes};
use serde_json::Value;
use tools::LocalToolset;
use tracing::{debug, info, warn};
use worker::WorkerRpcProxy;

use crate::normalize::{RawOutcome, normalize};

/// One place a tool can execute.
pub enum Backend {
    /// Sandboxed worker, optionally scoped to one server inside it.
    Worker {
        proxy: Arc<WorkerRpcProxy>,
        server_name: Option<String>,
    },
    /// Native host reached through the polling bridge.
    Host(HostBridge),
    /// In-process tools.
    Local(Arc<LocalToolset>),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Worker { .. } => BackendKind::Worker,
            Backend::Host(_) => BackendKind::Host,
            Backend::Local(_) => BackendKind::Local,
        }
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, args: Value) -> RawOutcome {
        match self {
            Backend::Worker { proxy, server_name } => {
                match proxy.call_tool(server_name.as_deref(), tool_name, args).await {
                    Ok(value) => RawOutcome::Json(value),
                    Err(e) => RawOutcome::Failed {
                        code: e.code(),
                        message: e.to_string(),
                        data: remote_data(&e),
                    },
                }
            }
            Backend::Host(bridge) => match bridge.call_tool(tool_name, args).await {
                Ok(text) => RawOutcome::Text(text),
                Err(e) => RawOutcome::failed(e.code(), e.to_string()),
            },
            Backend::Local(toolset) => match toolset.execute(call_id, tool_name, args).await {
                Ok(result) => RawOutcome::Call(result),
                Err(e) => RawOutcome::failed(e.code(), e.to_string()),
            },
        }
    }
}

fn remote_data(err: &proto::RpcError) -> Option<Value> {
    match err {
        proto::RpcError::Remote { data, .. } => data.clone(),
        _ => None,
    }
}

/// Owning backend of one tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub backend_id: String,
    pub kind: BackendKind,
}

/// A tool name published by more than one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowed {
    pub tool: String,
    /// Backend whose entry is routed.
    pub winner: String,
    /// Backend whose entry was hidden.
    pub loser: String,
}

struct Registration {
    backend: Arc<Backend>,
    tools: Vec<ToolDescriptor>,
    seq: u64,
}

/// Snapshot swapped in whole on every registration change.
#[derive(Default)]
struct Catalog {
    tools: Vec<ToolDescriptor>,
    routes: HashMap<String, Route>,
    backends: HashMap<String, Arc<Backend>>,
    shadowed: Vec<Shadowed>,
}

/// Routes tool calls by name to the backend that published them.
pub struct ToolRouter {
    registrations: Mutex<HashMap<String, Registration>>,
    next_seq: Mutex<u64>,
    catalog: RwLock<Arc<Catalog>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
            catalog: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    /// Publishes (or replaces) the catalog of `backend_id`.
    pub fn register(&self, backend_id: &str, backend: Backend, tools: Vec<ToolDescriptor>) {
        let mut registrations = self.registrations.lock();
        let seq = {
            let mut next = self.next_seq.lock();
            *next += 1;
            *next
        };
        info!(
            backend_id,
            kind = %backend.kind(),
            tools = tools.len(),
            "Registering tool backend"
        );
        registrations.insert(
            backend_id.to_string(),
            Registration {
                backend: Arc::new(backend),
                tools,
                seq,
            },
        );
        self.rebuild(&registrations);
    }

    /// Removes a backend and every tool it published. Returns `true` if it existed.
    pub fn unregister(&self, backend_id: &str) -> bool {
        let mut registrations = self.registrations.lock();
        let existed = registrations.remove(backend_id).is_some();
        if existed {
            info!(backend_id, "Unregistered tool backend");
            self.rebuild(&registrations);
        }
        existed
    }

    fn rebuild(&self, registrations: &HashMap<String, Registration>) {
        let mut ordered: Vec<(&String, &Registration)> = registrations.iter().collect();
        ordered.sort_by_key(|(_, r)| (r.backend.kind().precedence(), r.seq));

        let mut merged: HashMap<String, ToolDescriptor> = HashMap::new();
        let mut routes: HashMap<String, Route> = HashMap::new();
        let mut backends = HashMap::with_capacity(ordered.len());
        let mut shadowed = Vec::new();

        for (backend_id, registration) in ordered {
            let kind = registration.backend.kind();
            backends.insert(backend_id.clone(), registration.backend.clone());
            for tool in &registration.tools {
                let route = Route {
                    backend_id: backend_id.clone(),
                    kind,
                };
                match routes.insert(tool.name.clone(), route) {
                    Some(prev) if prev.backend_id == *backend_id => {
                        debug!(
                            tool = %tool.name,
                            backend_id = %backend_id,
                            "Backend listed a tool twice; keeping the last entry"
                        );
                    }
                    Some(prev) => {
                        warn!(
                            tool = %tool.name,
                            winner = %backend_id,
                            shadowed = %prev.backend_id,
                            "Tool name collision; later backend takes precedence"
                        );
                        shadowed.push(Shadowed {
                            tool: tool.name.clone(),
                            winner: backend_id.clone(),
                            loser: prev.backend_id,
                        });
                    }
                    None => {}
                }
                merged.insert(
                    tool.name.clone(),
                    ToolDescriptor {
                        backend: Some(kind),
                        ..tool.clone()
                    },
                );
            }
        }

        let mut tools: Vec<ToolDescriptor> = merged.into_values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(tools = tools.len(), "Tool catalog rebuilt");

        *self.catalog.write() = Arc::new(Catalog {
            tools,
            routes,
            backends,
            shadowed,
        });
    }

    fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    /// The merged catalog, sorted by name.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.snapshot().tools.clone()
    }

    /// Cross-backend name collisions resolved by the last rebuild.
    pub fn shadowed(&self) -> Vec<Shadowed> {
        self.snapshot().shadowed.clone()
    }

    /// Registered backend ids, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn route_for(&self, tool_name: &str) -> Option<Route> {
        self.snapshot().routes.get(tool_name).cloned()
    }

    /// Executes one call. Always yields a `ToolResult`; failures land in `error`.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let catalog = self.snapshot();

        let Some(route) = catalog.routes.get(&call.name) else {
            debug!(tool = %call.name, "Dispatch to unknown tool");
            return ToolResult::failure(
                &call.id,
                codes::METHOD_NOT_FOUND,
                format!("Tool '{}' not found", call.name),
                None,
                elapsed_ms(started),
            );
        };
        let Some(backend) = catalog.backends.get(&route.backend_id).cloned() else {
            return ToolResult::failure(
                &call.id,
                codes::INTERNAL_ERROR,
                format!("Backend '{}' is not registered", route.backend_id),
                None,
                elapsed_ms(started),
            );
        };

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(message) => {
                return ToolResult::failure(
                    &call.id,
                    codes::INVALID_PARAMS,
                    format!("Invalid arguments for '{}': {message}", call.name),
                    None,
                    elapsed_ms(started),
                );
            }
        };

        debug!(
            call_id = %call.id,
            tool = %call.name,
            backend_id = %route.backend_id,
            "Dispatching tool call"
        );
        let outcome = backend.invoke(&call.id, &call.name, args).await;
        normalize(&call.id, outcome, elapsed_ms(started))
    }

    /// Registers an in-process toolset as the `local` backend.
    pub fn register_local(&self, toolset: Arc<LocalToolset>) {
        let tools = toolset.descriptors();
        self.register("local", Backend::Local(toolset), tools);
    }

    /// Loads `server_name` in the worker and publishes its tools as `worker:{server_name}`.
    pub async fn register_worker_server(
        &self,
        proxy: Arc<WorkerRpcProxy>,
        server_name: &str,
    ) -> Result<usize, proto::RpcError> {
        proxy.load_server(server_name).await?;
        let tools = proxy.list_tools(Some(server_name)).await?;
        let count = tools.len();
        self.register(
            &format!("worker:{server_name}"),
            Backend::Worker {
                proxy,
                server_name: Some(server_name.to_string()),
            },
            tools,
        );
        Ok(count)
    }

    /// Publishes the host's catalog as the `host` backend.
    pub async fn register_host(&self, bridge: HostBridge) -> Result<usize, proto::BridgeError> {
        let tools = bridge.list_tools().await?;
        let count = tools.len();
        self.register("host", Backend::Host(bridge), tools);
        Ok(count)
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
