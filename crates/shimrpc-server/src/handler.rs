//! HTTP request handlers.

use crate::server::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use shimrpc_core::{RpcResponse, ShimError};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "interfaces": state.engine.contract().interface_names(),
    }))
}

/// Main JSON-RPC handler.
///
/// The raw body goes to the engine so malformed JSON gets a parse-error
/// envelope instead of an HTTP rejection. Dispatch blocks on the worker
/// pipes, so it runs on the blocking pool.
pub async fn handle_rpc(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    debug!("RPC body: {} bytes", body.len());

    let response = match tokio::task::spawn_blocking(move || state.dispatch(&body)).await {
        Ok(text) => text,
        Err(e) => {
            error!("RPC dispatch task failed: {}", e);
            let err = ShimError::internal(format!("dispatch task failed: {}", e));
            RpcResponse::failure(Value::Null, &err).into_value().to_string()
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
}

#[cfg(test)]
mod tests {
    use crate::server::{build_router, AppState, SharedExecutor};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use shimrpc_core::{executor_fn, Contract, ExitGate, RpcEngine, ShimError};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    const IDL: &str = "struct Point {\n  x int\n  y int\n}\n\ninterface Default {\n  add(a int, b int) int\n  origin() Point\n}\n";

    fn router() -> axum::Router {
        let contract = Arc::new(Contract::from_idl(IDL).unwrap());
        let executor: SharedExecutor = Arc::new(Mutex::new(executor_fn(
            |method: &str, params: &[Value], _: &Value| match method {
                "Default.add" => Ok(json!(params[0].as_i64().unwrap() + params[1].as_i64().unwrap())),
                "Default.origin" => Ok(json!({"x": 0, "y": "zero"})),
                other => Err(ShimError::method_not_found(other)),
            },
        )));
        build_router(Arc::new(AppState::new(
            RpcEngine::new(contract),
            executor,
            ExitGate::new(),
        )))
    }

    async fn post_rpc(body: &str) -> Value {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["interfaces"], json!(["Default"]));
    }

    #[tokio::test]
    async fn test_single_call() {
        let resp = post_rpc(r#"{"jsonrpc": "2.0", "id": 5, "method": "add", "params": [2, 3]}"#).await;
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 5, "result": 5}));
    }

    #[tokio::test]
    async fn test_invalid_params_and_response() {
        let resp = post_rpc(r#"{"id": 1, "method": "add", "params": [2]}"#).await;
        assert_eq!(resp["error"]["code"], -32602);

        let resp = post_rpc(r#"{"id": 2, "method": "origin", "params": []}"#).await;
        assert_eq!(resp["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let resp = post_rpc("{oops").await;
        assert_eq!(resp["error"]["code"], -32700);
        assert_eq!(resp["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_batch_in_order() {
        let resp = post_rpc(
            r#"[{"id": "a", "method": "add", "params": [1, 1]},
                {"id": "b", "method": "Nope.x", "params": []},
                {"id": "c", "method": "add", "params": [2, 2]}]"#,
        )
        .await;
        let items = resp.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["result"], 2);
        assert_eq!(items[1]["error"]["code"], -32601);
        assert_eq!(items[2]["id"], "c");
        assert_eq!(items[2]["result"], 4);
    }
}
