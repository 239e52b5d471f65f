//! Error types for shimrpc.
//!
//! Every failure the IDL compiler, the contract model, the call engine and
//! the process bridge can produce is a variant of [`ShimError`]. Each
//! variant maps onto a JSON-RPC error object so the call engine can turn
//! any failure into a response envelope at the dispatch boundary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// JSON-RPC standard error codes.
pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQ: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

/// Application-defined codes (-32000 to -32099).
pub const ERR_UNKNOWN: i64 = -32000;
pub const ERR_INVALID_RESP: i64 = -32001;
pub const ERR_SERVICE: i64 = -32002;

/// A single problem found while parsing an IDL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlError {
    pub line: usize,
    pub message: String,
}

impl IdlError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for IdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line: {} message: {}", self.line, self.message)
    }
}

/// Main error type for shimrpc.
#[derive(Debug, Error)]
pub enum ShimError {
    // IDL errors
    #[error("IDL parse failed: {}", join_idl_errors(.errors))]
    IdlParse { errors: Vec<IdlError> },

    // Request errors
    #[error("Invalid Request: {message}")]
    InvalidRequest {
        message: String,
        data: Option<Value>,
    },

    #[error("Method Not Found: {message}")]
    MethodNotFound {
        message: String,
        data: Option<Value>,
    },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unknown entity: '{name}'")]
    UnknownEntity { name: String },

    // Execution errors
    #[error("Internal Error - {message}")]
    Internal {
        message: String,
        data: Option<Value>,
    },

    #[error("Sub-command returned a non-zero exit ({exit_code})")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Error - {message}")]
    Custom {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    // Worker process errors
    #[error("Worker exited before responding (status {status})")]
    WorkerExited { status: i32 },

    #[error("Worker protocol error: {message}")]
    Protocol { message: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for shimrpc operations.
pub type Result<T> = std::result::Result<T, ShimError>;

fn join_idl_errors(errors: &[IdlError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for ShimError {
    fn from(err: std::io::Error) -> Self {
        ShimError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ShimError {
    fn from(err: serde_json::Error) -> Self {
        ShimError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ShimError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShimError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ShimError::InvalidRequest {
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        ShimError::MethodNotFound {
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ShimError::Internal {
            message: message.into(),
            data: None,
        }
    }

    /// Map a worker-reported error code onto a typed error.
    ///
    /// Any exact match of the "method not found" code is reported as
    /// `MethodNotFound`, whatever the worker meant by it. Every other code,
    /// including the standard internal-error code, is kept as `Custom`.
    pub fn from_worker(code: i64, message: Option<String>, data: Option<Value>) -> Self {
        match code {
            ERR_METHOD_NOT_FOUND => ShimError::MethodNotFound {
                message: message.unwrap_or_default(),
                data,
            },
            _ => ShimError::Custom {
                code,
                message: message.unwrap_or_default(),
                data,
            },
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes: -32700 parse, -32600 invalid request, -32601 method
    /// not found, -32602 invalid params, -32603 internal.
    /// Extensions: -32001 invalid response and non-zero worker exit.
    /// Custom worker errors keep their own code.
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            ShimError::IdlParse { .. } | ShimError::Json { .. } => ERR_PARSE,
            ShimError::InvalidRequest { .. } => ERR_INVALID_REQ,
            ShimError::MethodNotFound { .. } => ERR_METHOD_NOT_FOUND,
            ShimError::InvalidParams { .. } | ShimError::UnknownEntity { .. } => {
                ERR_INVALID_PARAMS
            }
            ShimError::InvalidResponse { .. } | ShimError::NonZeroExit { .. } => ERR_INVALID_RESP,
            ShimError::Custom { code, .. } => *code,

            // All other errors are internal errors
            _ => ERR_INTERNAL,
        }
    }

    /// Build the JSON-RPC error object carried by a response envelope.
    pub fn to_rpc_error(&self) -> RpcErrorObject {
        let data = match self {
            ShimError::IdlParse { errors } => Some(json!(errors)),
            ShimError::InvalidRequest { data, .. }
            | ShimError::MethodNotFound { data, .. }
            | ShimError::Custom { data, .. } => data.clone(),
            ShimError::Internal { data, .. } => Some(
                data.clone()
                    .unwrap_or_else(|| json!({ "exception": self.to_string() })),
            ),
            ShimError::NonZeroExit { exit_code, stderr } => {
                Some(json!({ "exit_code": exit_code, "stderr": stderr }))
            }
            ShimError::WorkerExited { .. }
            | ShimError::Protocol { .. }
            | ShimError::Timeout(_)
            | ShimError::Io { .. }
            | ShimError::Config { .. } => Some(json!({ "exception": self.to_string() })),
            _ => None,
        };

        RpcErrorObject {
            code: self.to_rpc_error_code(),
            message: self.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShimError::UnknownEntity {
            name: "Person".into(),
        };
        assert_eq!(err.to_string(), "Unknown entity: 'Person'");
    }

    #[test]
    fn test_idl_parse_display_lists_every_error() {
        let err = ShimError::IdlParse {
            errors: vec![IdlError::new(3, "undefined type: Foo"), IdlError::new(7, "boom")],
        };
        assert_eq!(
            err.to_string(),
            "IDL parse failed: line: 3 message: undefined type: Foo, line: 7 message: boom"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(ShimError::method_not_found("x").to_rpc_error_code(), -32601);
        assert_eq!(
            ShimError::InvalidParams {
                message: "x".into()
            }
            .to_rpc_error_code(),
            -32602
        );
        assert_eq!(ShimError::internal("x").to_rpc_error_code(), -32603);
        assert_eq!(
            ShimError::Timeout(std::time::Duration::from_secs(1)).to_rpc_error_code(),
            -32603
        );
    }

    #[test]
    fn test_worker_not_found_code_always_maps_to_method_not_found() {
        let err = ShimError::from_worker(-32601, Some("custom meaning".into()), None);
        assert!(matches!(err, ShimError::MethodNotFound { .. }));
        assert_eq!(err.to_rpc_error_code(), -32601);
    }

    #[test]
    fn test_worker_custom_code_is_preserved() {
        let err = ShimError::from_worker(-32002, Some("bad input".into()), Some(json!({"k": 1})));
        let obj = err.to_rpc_error();
        assert_eq!(obj.code, -32002);
        assert_eq!(obj.message, "Error - bad input");
        assert_eq!(obj.data, Some(json!({"k": 1})));
    }

    #[test]
    fn test_worker_internal_code_stays_custom() {
        let err = ShimError::from_worker(-32603, Some("db down".into()), None);
        assert!(matches!(err, ShimError::Custom { code: -32603, .. }));
        let obj = err.to_rpc_error();
        assert_eq!(obj.code, -32603);
        assert_eq!(obj.message, "Error - db down");
        assert_eq!(obj.data, None);
    }

    #[test]
    fn test_non_zero_exit_carries_exit_code_and_stderr() {
        let obj = ShimError::NonZeroExit {
            exit_code: 2,
            stderr: "oops".into(),
        }
        .to_rpc_error();
        assert_eq!(obj.code, -32001);
        assert_eq!(obj.data, Some(json!({"exit_code": 2, "stderr": "oops"})));
    }
}
