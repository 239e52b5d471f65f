//! Synchronous JSON-RPC call engine.
//!
//! Validates each request against the [`Contract`], hands it to an
//! [`Executor`] and validates the result on the way back. Batches are
//! processed one element at a time in list order.

use super::protocol::RpcResponse;
use crate::config::RpcConfig;
use crate::contract::Contract;
use crate::error::{Result, ShimError};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Carries out validated calls.
pub trait Executor {
    /// Run `method` (`Interface.function`) with already-validated params.
    fn execute(&mut self, method: &str, params: &[Value], id: &Value) -> Result<Value>;

    /// Called once before a batch whose first request targets `iface`.
    fn before_batch(&mut self, _iface: &str) -> Result<()> {
        Ok(())
    }

    /// Called once after that batch.
    fn after_batch(&mut self, _iface: &str) -> Result<()> {
        Ok(())
    }
}

/// Executor backed by a closure.
pub struct FnExecutor<F>(F);

/// Wrap a closure as an [`Executor`].
pub fn executor_fn<F>(f: F) -> FnExecutor<F>
where
    F: FnMut(&str, &[Value], &Value) -> Result<Value>,
{
    FnExecutor(f)
}

impl<F> Executor for FnExecutor<F>
where
    F: FnMut(&str, &[Value], &Value) -> Result<Value>,
{
    fn execute(&mut self, method: &str, params: &[Value], id: &Value) -> Result<Value> {
        (self.0)(method, params, id)
    }
}

/// Dispatches JSON-RPC requests against a contract.
#[derive(Debug, Clone)]
pub struct RpcEngine {
    contract: Arc<Contract>,
    default_interface: String,
}

impl RpcEngine {
    pub fn new(contract: Arc<Contract>) -> Self {
        Self {
            contract,
            default_interface: RpcConfig::DEFAULT_INTERFACE.to_string(),
        }
    }

    /// Interface used for methods given without an `Interface.` prefix.
    pub fn with_default_interface(mut self, name: impl Into<String>) -> Self {
        self.default_interface = name.into();
        self
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn default_interface(&self) -> &str {
        &self.default_interface
    }

    /// Handle a single request object or a batch list.
    pub fn call<E: Executor + ?Sized>(&self, request: Value, executor: &mut E) -> Value {
        match request {
            Value::Array(items) if items.is_empty() => {
                let err = ShimError::InvalidRequest {
                    message: "Empty batch".to_string(),
                    data: Some(json!({ "msg": "Empty Batch" })),
                };
                warn!("Rejected empty batch");
                RpcResponse::failure(Value::Null, &err).into_value()
            }
            Value::Array(items) => Value::Array(self.call_batch(items, executor)),
            single => self.call_single(single, executor).into_value(),
        }
    }

    /// Handle a request given as JSON text.
    pub fn call_json<E: Executor + ?Sized>(&self, text: &str, executor: &mut E) -> String {
        let response = match serde_json::from_str::<Value>(text) {
            Ok(request) => self.call(request, executor),
            Err(e) => {
                warn!("Unable to parse request JSON: {}", e);
                RpcResponse::failure(Value::Null, &ShimError::from(e)).into_value()
            }
        };
        response.to_string()
    }

    fn call_batch<E: Executor + ?Sized>(&self, items: Vec<Value>, executor: &mut E) -> Vec<Value> {
        let iface = items.first().and_then(|first| self.batch_interface(first));
        debug!("Batch of {} request(s), interface {:?}", items.len(), iface);

        if let Some(iface) = &iface {
            if let Err(e) = executor.before_batch(iface) {
                warn!("Pre-batch hook for {} failed: {}", iface, e);
            }
        }

        let responses = items
            .into_iter()
            .map(|item| self.call_single(item, executor).into_value())
            .collect();

        if let Some(iface) = &iface {
            if let Err(e) = executor.after_batch(iface) {
                warn!("Post-batch hook for {} failed: {}", iface, e);
            }
        }
        responses
    }

    /// Interface targeted by a batch, taken from its first request.
    fn batch_interface(&self, first: &Value) -> Option<String> {
        let method = first.get("method")?.as_str()?;
        match method.split_once('.') {
            Some((iface, _)) => Some(iface.to_string()),
            None => Some(self.default_interface.clone()),
        }
    }

    /// Handle one request; every failure becomes an error envelope.
    pub fn call_single<E: Executor + ?Sized>(&self, request: Value, executor: &mut E) -> RpcResponse {
        let mut req = match request {
            Value::Object(req) => req,
            other => {
                let err = ShimError::InvalidRequest {
                    message: format!("{} is not an object", other),
                    data: Some(json!({ "msg": format!("{} is not an object.", other) })),
                };
                return RpcResponse::failure(Value::Null, &err);
            }
        };

        let id = req
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();
        req.entry("jsonrpc")
            .or_insert_with(|| Value::String(RpcConfig::JSONRPC_VERSION.to_string()));

        match self.dispatch(&req, &id, executor) {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
                warn!("Request {} failed: {}", id, e);
                RpcResponse::failure(id, &e)
            }
        }
    }

    fn dispatch<E: Executor + ?Sized>(
        &self,
        req: &Map<String, Value>,
        id: &Value,
        executor: &mut E,
    ) -> Result<Value> {
        let method = match req.get("method") {
            Some(Value::String(method)) => method.as_str(),
            Some(other) => {
                return Err(ShimError::InvalidRequest {
                    message: format!("method must be a string, got {}", other),
                    data: None,
                })
            }
            None => {
                return Err(ShimError::InvalidRequest {
                    message: "No method".to_string(),
                    data: Some(json!({ "msg": "No method" })),
                })
            }
        };

        if method == RpcConfig::IDL_METHOD || method == RpcConfig::IDL_METHOD_ALIAS {
            debug!("Request {}: contract introspection", id);
            return Ok(serde_json::to_value(self.contract.idl())?);
        }

        let method = if method.contains('.') {
            method.to_string()
        } else {
            format!("{}.{}", self.default_interface, method)
        };
        let (iface, func) = method
            .split_once('.')
            .ok_or_else(|| ShimError::method_not_found(format!("Method not found: {}", method)))?;

        let params = match req.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(params)) => params.clone(),
            Some(other) => {
                return Err(ShimError::InvalidParams {
                    message: format!("params must be a list, got {}", other),
                })
            }
        };

        debug!("Request {}: {}({} param(s))", id, method, params.len());

        self.contract.validate_request(iface, func, &params)?;
        let result = executor.execute(&method, &params, id)?;
        self.contract.validate_response(iface, func, &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RpcEngine {
        let contract = Contract::from_idl(
            "interface Default {\n  add(x int, y int) int\n}\n\ninterface Math {\n  neg(x int) int\n}\n",
        )
        .unwrap();
        RpcEngine::new(Arc::new(contract))
    }

    fn adder() -> FnExecutor<impl FnMut(&str, &[Value], &Value) -> Result<Value>> {
        executor_fn(|method: &str, params: &[Value], _id: &Value| match method {
            "Default.add" => Ok(json!(params[0].as_i64().unwrap_or(0) + params[1].as_i64().unwrap_or(0))),
            "Math.neg" => Ok(json!(-params[0].as_i64().unwrap_or(0))),
            other => Err(ShimError::method_not_found(other)),
        })
    }

    #[test]
    fn test_default_interface_and_generated_id() {
        let resp = engine().call(json!({"method": "add", "params": [1, 2]}), &mut adder());
        assert_eq!(resp["result"], 3);
        assert_eq!(resp["jsonrpc"], "2.0");
        let id = resp["id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_custom_default_interface() {
        let engine = engine().with_default_interface("Math");
        let resp = engine.call(json!({"id": 1, "method": "neg", "params": [4]}), &mut adder());
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": -4}));
    }

    #[test]
    fn test_non_object_and_missing_method() {
        let engine = engine();
        let resp = engine.call(json!(42), &mut adder());
        assert_eq!(resp["error"]["code"], -32600);
        assert_eq!(resp["id"], Value::Null);

        let resp = engine.call(json!({"id": "x"}), &mut adder());
        assert_eq!(resp["error"]["code"], -32600);
        assert_eq!(resp["id"], "x");
    }

    #[test]
    fn test_introspection_returns_declarations() {
        let resp = engine().call(json!({"method": "getIdl"}), &mut adder());
        let decls = resp["result"].as_array().unwrap();
        assert_eq!(decls[0]["type"], "interface");
        assert_eq!(decls.last().unwrap()["type"], "meta");
    }

    #[test]
    fn test_executor_error_becomes_envelope() {
        let mut failing = executor_fn(|_: &str, _: &[Value], _: &Value| -> Result<Value> {
            Err(ShimError::Custom {
                code: -32002,
                message: "boom".into(),
                data: None,
            })
        });
        let resp = engine().call(json!({"id": 1, "method": "add", "params": [1, 2]}), &mut failing);
        assert_eq!(resp["error"]["code"], -32002);
        assert_eq!(resp["error"]["message"], "Error - boom");
    }

    #[test]
    fn test_bad_result_is_invalid_response() {
        let mut wrong = executor_fn(|_: &str, _: &[Value], _: &Value| Ok(json!("three")));
        let resp = engine().call(json!({"method": "add", "params": [1, 2]}), &mut wrong);
        assert_eq!(resp["error"]["code"], -32001);
    }

    #[test]
    fn test_params_must_be_list() {
        let resp = engine().call(json!({"method": "add", "params": {"x": 1}}), &mut adder());
        assert_eq!(resp["error"]["code"], -32602);
    }

    #[test]
    fn test_empty_batch_is_single_error() {
        let resp = engine().call(json!([]), &mut adder());
        assert!(resp.is_object());
        assert_eq!(resp["error"]["code"], -32600);
    }

    #[test]
    fn test_call_json_parse_error() {
        let out = engine().call_json("{not json", &mut adder());
        let resp: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(resp["error"]["code"], -32700);
        assert_eq!(resp["id"], Value::Null);
    }

    #[test]
    fn test_batch_keeps_failures_isolated() {
        let resp = engine().call(
            json!([
                {"id": 1, "method": "add", "params": [1, 1]},
                {"id": 2, "method": "sub", "params": [1, 1]},
                {"id": 3, "method": "Math.neg", "params": [5]}
            ]),
            &mut adder(),
        );
        let items = resp.as_array().unwrap();
        assert_eq!(items[0]["result"], 2);
        assert_eq!(items[1]["error"]["code"], -32601);
        assert_eq!(items[2]["result"], -5);
    }
}
