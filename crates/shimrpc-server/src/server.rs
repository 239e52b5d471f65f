//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use shimrpc_core::{load_or_compile, Contract, ExitGate, Executor, IdlConfig, RpcEngine};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Executor shared by all requests. Calls are serialized through the lock.
pub type SharedExecutor = Arc<Mutex<dyn Executor + Send>>;

/// Application state shared across handlers.
pub struct AppState {
    /// Contract-checked call engine
    pub engine: RpcEngine,
    /// Worker bridge (or any other executor in tests)
    pub executor: SharedExecutor,
    /// Marks requests in flight so shutdown can wait for them
    pub gate: ExitGate,
}

impl AppState {
    pub fn new(engine: RpcEngine, executor: SharedExecutor, gate: ExitGate) -> Self {
        Self {
            engine,
            executor,
            gate,
        }
    }

    /// Run one request body (single or batch) to completion. Blocking.
    pub fn dispatch(&self, body: &str) -> String {
        let mut executor = self.executor.lock().unwrap_or_else(PoisonError::into_inner);
        let _in_flight = self.gate.enter();
        self.engine.call_json(body, &mut *executor)
    }
}

/// Load the contract for `work_dir`, recompiling the IDL when it changed.
pub fn load_contract(work_dir: &Path, idl: Option<PathBuf>) -> shimrpc_core::Result<Contract> {
    let idl_path = idl.unwrap_or_else(|| work_dir.join(IdlConfig::IDL_FILE_NAME));
    let compiled_path = idl_path
        .parent()
        .unwrap_or(work_dir)
        .join(IdlConfig::COMPILED_FILE_NAME);
    load_or_compile(&idl_path, &compiled_path)
}

/// Build the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, handle))
}
