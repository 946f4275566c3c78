//! Builds the router from configuration: worker sandbox, native host and local tools.

use std::sync::Arc;

use agent::{Backend, ToolRouter};
use host::{HostBridge, HttpHostChannel};
use search::SearchEngine;
use tools::{LocalToolset, content_tools};
use tracing::{info, warn};
use worker::{ProcessWorker, WorkerRpcProxy};

use crate::config::Config;

/// Live backends behind one router.
pub struct Backends {
    pub router: Arc<ToolRouter>,
    pub engine: Arc<SearchEngine>,
    worker: Option<Arc<WorkerRpcProxy>>,
}

impl Backends {
    /// Wires every configured backend. Unreachable remote backends are
    /// logged and skipped so local tools stay usable.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let router = Arc::new(ToolRouter::new());

        let engine = Arc::new(SearchEngine::new(
            config.search.bm25_params(),
            config.search.max_chunks_per_store,
        ));
        engine.initialize();
        let mut toolset = LocalToolset::new();
        for tool in content_tools(
            Arc::clone(&engine),
            config.search.lines_per_chunk,
            config.search.default_top_n,
        ) {
            toolset.register_arc(tool);
        }
        router.register_local(Arc::new(toolset));

        let worker = match &config.worker.command {
            Some(command) => Some(start_worker(&router, config, command).await?),
            None => None,
        };

        if let Some(url) = &config.host.url {
            let bridge = HostBridge::new(
                Arc::new(HttpHostChannel::new(url.as_str())),
                config.host.bridge_options(),
            );
            match router.register_host(bridge).await {
                Ok(count) => info!(url = %url, tools = count, "Host backend registered"),
                Err(e) => warn!(url = %url, "Host backend unavailable: {e}"),
            }
        }

        Ok(Self {
            router,
            engine,
            worker,
        })
    }

    /// Terminates the worker sandbox, if one was started.
    pub async fn shutdown(&self) {
        if let Some(proxy) = &self.worker {
            proxy.dispose().await;
        }
    }
}

async fn start_worker(
    router: &ToolRouter,
    config: &Config,
    command: &str,
) -> anyhow::Result<Arc<WorkerRpcProxy>> {
    let (transport, replies) = ProcessWorker::spawn(command, &config.worker.args)?;
    let proxy = Arc::new(WorkerRpcProxy::new(
        transport,
        replies,
        config.worker.proxy_options(),
    ));
    info!(command, "Worker sandbox started");

    if config.worker.servers.is_empty() {
        match proxy.list_tools(None).await {
            Ok(tools) => {
                info!(tools = tools.len(), "Worker backend registered");
                router.register(
                    "worker",
                    Backend::Worker {
                        proxy: Arc::clone(&proxy),
                        server_name: None,
                    },
                    tools,
                );
            }
            Err(e) => warn!("Worker tool listing failed: {e}"),
        }
        return Ok(proxy);
    }

    for server in &config.worker.servers {
        match router
            .register_worker_server(Arc::clone(&proxy), server)
            .await
        {
            Ok(count) => info!(server = %server, tools = count, "Worker server registered"),
            Err(e) => warn!(server = %server, "Worker server failed to load: {e}"),
        }
    }
    Ok(proxy)
}
