//! ShimRPC Core - contract-checked JSON-RPC dispatch to worker processes.
//!
//! A service is described by an IDL file. The [`idl`] module compiles it
//! into declarations, [`Contract`] checks requests and responses against
//! them, [`RpcEngine`] runs JSON-RPC calls, and (on unix) the bridge
//! forwards validated calls to a worker subprocess over named pipes.
//!
//! # Example
//!
//! ```rust,ignore
//! use shimrpc_core::{BridgeOptions, Contract, ProcessBridge, RpcEngine, Stack};
//! use std::sync::Arc;
//!
//! fn main() -> shimrpc_core::Result<()> {
//!     let contract = Arc::new(Contract::from_idl(
//!         "interface Default {\n  add(x int, y int) int\n}\n",
//!     )?);
//!     let engine = RpcEngine::new(contract.clone());
//!
//!     let options = BridgeOptions::for_stack(Stack::Python).with_work_dir("/srv/service");
//!     let mut bridge = ProcessBridge::start(contract, options)?;
//!
//!     let response = engine.call_json(
//!         r#"{"jsonrpc": "2.0", "id": 1, "method": "add", "params": [1, 2]}"#,
//!         &mut bridge,
//!     );
//!     println!("{}", response);
//!
//!     bridge.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod contract;
pub mod control;
pub mod error;
pub mod idl;
pub mod rpc;

#[cfg(unix)]
pub mod bridge;

// Re-export commonly used types
pub use config::{BridgeConfig, IdlConfig, RpcConfig, Stack};
pub use contract::{compile_file, load_or_compile, Contract};
pub use control::{ControlListener, ControlMessage, ExitGate, InFlight};
pub use error::{Result, RpcErrorObject, ShimError};
pub use idl::{Declaration, IdlParser};
pub use rpc::{executor_fn, Executor, RpcEngine, RpcRequest, RpcResponse};

#[cfg(unix)]
pub use bridge::{BridgeOptions, BridgeState, Lifecycle, ProcessBridge};
