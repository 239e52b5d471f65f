//! ShimRPC Server - HTTP JSON-RPC front end for a worker process.
//!
//! Loads the service contract from the work directory, starts the worker
//! subprocess and serves `POST /rpc`. Ctrl-C waits for the request in
//! flight, shuts the worker down and exits.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use shimrpc_core::{
    BridgeOptions, ControlListener, ControlMessage, ExitGate, ProcessBridge, RpcEngine, Stack,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "shimrpc-server")]
#[command(about = "JSON-RPC server that forwards contract-checked calls to a worker process")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Service directory holding api.idl and the worker (defaults to cwd)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// IDL file (defaults to <work-dir>/api.idl)
    #[arg(long)]
    idl: Option<PathBuf>,

    /// Worker runtime: python, python2 or nodejs
    #[arg(long, default_value = "python")]
    stack: String,

    /// Explicit worker command line, overriding --stack
    #[arg(long)]
    worker_cmd: Option<String>,

    /// Interface used for methods without an `Interface.` prefix
    #[arg(long, default_value = "Default")]
    default_interface: String,

    /// Seconds allowed for worker shutdown before it is killed
    #[arg(long, default_value = "5")]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    info!("Starting ShimRPC Server");

    let work_dir = match args.work_dir {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    info!("Work dir: {}", work_dir.display());

    let contract = Arc::new(
        server::load_contract(&work_dir, args.idl).context("failed to load service contract")?,
    );
    info!("Interfaces: {}", contract.interface_names().join(", "));

    let options = match args.worker_cmd {
        Some(cmd) => BridgeOptions::new(cmd.split_whitespace().map(str::to_string).collect()),
        None => {
            let stack = Stack::from_str(&args.stack)
                .with_context(|| format!("unknown stack: {}", args.stack))?;
            BridgeOptions::for_stack(stack)
        }
    }
    .with_work_dir(&work_dir)
    .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));

    let bridge_contract = contract.clone();
    let bridge = tokio::task::spawn_blocking(move || ProcessBridge::start(bridge_contract, options))
        .await?
        .context("failed to start worker")?;
    let bridge = Arc::new(Mutex::new(bridge));

    let engine = RpcEngine::new(contract).with_default_interface(args.default_interface);
    let gate = ExitGate::new();
    let state = Arc::new(server::AppState::new(engine, bridge.clone(), gate.clone()));

    // Shut the worker down once no request is in flight
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let listener = ControlListener::spawn(gate, move || {
        let status = bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        info!("Worker shutdown complete: {:?}", status);
        let _ = done_tx.send(());
    })?;

    let (addr, server_handle) = server::start_server(state, &args.host, args.port).await?;

    // Print port for the parent process to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, waiting for in-flight request");
    listener.send(ControlMessage::Kill);

    if done_rx.await.is_err() {
        warn!("Control listener exited without shutting down the worker");
    }
    server_handle.abort();
    tokio::task::spawn_blocking(move || listener.join()).await?;

    Ok(())
}
