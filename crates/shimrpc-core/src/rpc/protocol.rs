//! JSON-RPC envelopes and worker pipe documents.
//!
//! Host boundary:
//!
//! ```text
//! -> {"jsonrpc": "2.0", "id": "1", "method": "Default.add", "params": [1, 2]}
//! <- {"jsonrpc": "2.0", "id": "1", "result": 3}
//! ```
//!
//! Worker pipes:
//!
//! ```text
//! -> {"method": "Default.add", "params": [1, 2], "req_id": "1"}
//! <- {"result": 3}  |  {"error": -32002, "msg": "...", "data": {...}}
//! ```

use crate::config::RpcConfig;
use crate::error::{Result, RpcErrorObject, ShimError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response from a typed error.
    pub fn failure(id: Value, err: &ShimError) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(err.to_rpc_error()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Envelope as a JSON object, with `result: null` kept for void calls.
    pub fn into_value(self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(self.jsonrpc));
        obj.insert("id".into(), self.id);
        match self.error {
            Some(err) => {
                let mut e = Map::new();
                e.insert("code".into(), Value::from(err.code));
                e.insert("message".into(), Value::String(err.message));
                if let Some(data) = err.data {
                    e.insert("data".into(), data);
                }
                obj.insert("error".into(), Value::Object(e));
            }
            None => {
                obj.insert("result".into(), self.result.unwrap_or(Value::Null));
            }
        }
        Value::Object(obj)
    }
}

/// Document written to the worker's request pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub req_id: String,
}

impl WorkerRequest {
    pub fn new(method: impl Into<String>, params: &[Value], id: &Value) -> Self {
        Self {
            method: method.into(),
            params: params.to_vec(),
            req_id: id_to_string(id),
        }
    }
}

/// Interpret a document read from the worker's response pipe.
pub fn parse_worker_response(doc: Value) -> Result<Value> {
    let Value::Object(mut obj) = doc else {
        return Err(ShimError::Protocol {
            message: format!("worker response is not an object: {}", doc),
        });
    };

    if let Some(code) = obj.remove("error") {
        let code = code.as_i64().ok_or_else(|| ShimError::Protocol {
            message: format!("worker error code is not an integer: {}", code),
        })?;
        let msg = obj
            .remove("msg")
            .and_then(|m| m.as_str().map(str::to_string));
        let data = obj.remove("data").filter(|d| !d.is_null());
        return Err(ShimError::from_worker(code, msg, data));
    }

    obj.remove("result").ok_or_else(|| ShimError::Protocol {
        message: "worker response has neither result nor error".to_string(),
    })
}

/// Text form of a request id, as sent to the worker.
pub fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Put batch responses back into request order by id.
///
/// A request whose id has no response gets an invalid-response error.
pub fn join_batch_responses(requests: &[Value], responses: &[Value]) -> Vec<Value> {
    let by_id: HashMap<String, &Value> = responses
        .iter()
        .filter_map(|r| r.get("id").map(|id| (id.to_string(), r)))
        .collect();

    requests
        .iter()
        .map(|req| {
            let id = req.get("id").cloned().unwrap_or(Value::Null);
            match by_id.get(&id.to_string()) {
                Some(resp) => (*resp).clone(),
                None => {
                    let err = ShimError::InvalidResponse {
                        message: format!("Batch response missing result for request id: {}", id),
                    };
                    RpcResponse::failure(id, &err).into_value()
                }
            }
        })
        .collect()
}
