//! Centralized configuration for shimrpc.
//!
//! This module provides the constants shared by the IDL compiler, the call
//! engine and the process bridge, plus the table of supported worker stacks.

use std::time::Duration;

/// JSON-RPC envelope and dispatch configuration.
pub struct RpcConfig;

impl RpcConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const DEFAULT_INTERFACE: &'static str = "Default";

    // Reserved method names that return the parsed declaration list
    pub const IDL_METHOD: &'static str = "common.barrister-idl";
    pub const IDL_METHOD_ALIAS: &'static str = "getIdl";

    /// Request id used for lifecycle control calls.
    pub const CONTROL_REQ_ID: &'static str = "shcmd";
}

/// Worker process bridge configuration.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const REQ_PIPE_NAME: &'static str = ".req.json";
    pub const RESP_PIPE_NAME: &'static str = ".resp.json";
    pub const SCRATCH_DIR_NAME: &'static str = ".shimrpc";

    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
    pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);
    pub const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const READ_CHUNK_SIZE: usize = 8192;
    pub const STDERR_TAIL_LINES: usize = 50;
    /// How long to wait for worker output to drain after it exits.
    pub const OUTPUT_SETTLE: Duration = Duration::from_millis(200);
}

/// IDL compiler configuration.
pub struct IdlConfig;

impl IdlConfig {
    pub const IDL_FILE_NAME: &'static str = "api.idl";
    pub const COMPILED_FILE_NAME: &'static str = ".api.json";
    pub const SEARCH_PATH_ENV: &'static str = "SHIMRPC_IDL_PATH";
    pub const SCHEMA_VERSION: &'static str = "v1.0";
}

/// Worker runtime stacks with a known launch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stack {
    Python,
    Python2,
    NodeJs,
}

impl Stack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stack::Python => "python",
            Stack::Python2 => "python2",
            Stack::NodeJs => "nodejs",
        }
    }

    /// Command line used to start the worker, relative to the work dir.
    pub fn launch_command(&self) -> &'static [&'static str] {
        match self {
            Stack::Python => &["/usr/bin/env", "python3", "runner.py"],
            Stack::Python2 => &["/usr/bin/env", "python2", "runner.py"],
            Stack::NodeJs => &["/usr/bin/env", "node", "--es_staging", "runner.js"],
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" | "python3" => Some(Stack::Python),
            "python2" => Some(Stack::Python2),
            "nodejs" | "node" => Some(Stack::NodeJs),
            _ => None,
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Stack::Python
    }
}

impl std::fmt::Display for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
