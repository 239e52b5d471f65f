//! End-to-end tests against real worker processes speaking the pipe protocol.
#![cfg(unix)]

use serde_json::{json, Value};
use shimrpc_core::{BridgeOptions, BridgeState, Contract, ProcessBridge, RpcEngine};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const IDL: &str = "interface Default {\n  add(x int, y int) int\n  fail() int\n}\n";

/// Shell worker: logs every request to calls.log and answers by method.
const WORKER: &str = r#"while true; do
  req=$(cat .req.json)
  echo "$req" >> calls.log
  case "$req" in
    *'"method":"Default.add"'*) printf '{"result": 3}' > .resp.json ;;
    *'"method":"Default.fail"'*) printf '{"error": -32002, "msg": "bad input", "data": {"field": "x"}}' > .resp.json ;;
    *'"req_id":"shcmd"'*) printf '{"result": null}' > .resp.json ;;
    *) printf '{"error": -32601, "msg": "no such method"}' > .resp.json ;;
  esac
done"#;

fn sh_options(dir: &Path, script: &str) -> BridgeOptions {
    BridgeOptions::new(vec!["/bin/sh".into(), "-c".into(), script.into()])
        .with_work_dir(dir)
        .with_poll_interval(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_secs(2))
}

fn contract() -> Arc<Contract> {
    Arc::new(Contract::from_idl(IDL).unwrap())
}

fn logged_methods(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(|line| {
            let req: Value = serde_json::from_str(line).unwrap();
            req["method"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_calls_flow_through_worker() {
    let temp = TempDir::new().unwrap();
    let contract = contract();
    let engine = RpcEngine::new(contract.clone());
    let mut bridge = ProcessBridge::start(contract, sh_options(temp.path(), WORKER)).unwrap();
    assert_eq!(bridge.state(), BridgeState::Ready);

    let resp = engine.call(json!({"id": 1, "method": "add", "params": [1, 2]}), &mut bridge);
    assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": 3}));

    // Rejected by the contract before reaching the worker
    let resp = engine.call(json!({"id": 2, "method": "sub", "params": [1, 2]}), &mut bridge);
    assert_eq!(resp["error"]["code"], -32601);
    let resp = engine.call(json!({"id": 3, "method": "add", "params": [1]}), &mut bridge);
    assert_eq!(resp["error"]["code"], -32602);

    let resp = engine.call(json!({"id": 4, "method": "fail", "params": []}), &mut bridge);
    assert_eq!(resp["error"]["code"], -32002);
    assert_eq!(resp["error"]["message"], "Error - bad input");
    assert_eq!(resp["error"]["data"], json!({"field": "x"}));

    bridge.shutdown();
    assert_eq!(bridge.state(), BridgeState::Terminated);
    assert!(!temp.path().join(".req.json").exists());

    assert_eq!(
        logged_methods(temp.path()),
        vec!["Default.startup", "Default.add", "Default.fail", "Default.shutdown"]
    );
}

#[test]
fn test_batch_sends_lifecycle_hooks() {
    let temp = TempDir::new().unwrap();
    let contract = contract();
    let engine = RpcEngine::new(contract.clone());
    let options = sh_options(temp.path(), WORKER).with_startup_calls(false);
    let mut bridge = ProcessBridge::start(contract, options).unwrap();

    let resp = engine.call(
        json!([
            {"id": "a", "method": "add", "params": [1, 2]},
            {"id": "b", "method": "Default.add", "params": [2, 1]}
        ]),
        &mut bridge,
    );
    let items = resp.as_array().unwrap();
    assert_eq!(items[0]["id"], "a");
    assert_eq!(items[1]["result"], 3);

    drop(bridge);
    assert_eq!(
        logged_methods(temp.path()),
        vec![
            "Default.preBatch",
            "Default.add",
            "Default.add",
            "Default.postBatch",
            "Default.shutdown"
        ]
    );
}

#[test]
fn test_non_zero_exit_reported_with_stderr() {
    let temp = TempDir::new().unwrap();
    let contract = contract();
    let engine = RpcEngine::new(contract.clone());
    let options = sh_options(
        temp.path(),
        "cat .req.json > /dev/null; echo boom >&2; exit 3",
    )
    .with_startup_calls(false);
    let mut bridge = ProcessBridge::start(contract, options).unwrap();

    let resp = engine.call(json!({"id": 1, "method": "add", "params": [1, 2]}), &mut bridge);
    assert_eq!(resp["error"]["code"], -32001);
    assert_eq!(
        resp["error"]["message"],
        "Sub-command returned a non-zero exit (3)"
    );
    assert_eq!(resp["error"]["data"]["exit_code"], 3);
    assert!(resp["error"]["data"]["stderr"]
        .as_str()
        .unwrap()
        .contains("boom"));

    // The scratch dir of the failed request stays behind
    assert!(temp.path().join(".shimrpc").join("1").is_dir());
}

#[test]
fn test_shutdown_bounded_by_timeout() {
    let temp = TempDir::new().unwrap();
    let options = sh_options(temp.path(), "trap '' TERM; sleep 30")
        .with_startup_calls(false)
        .with_shutdown_timeout(Duration::from_millis(300));
    let mut bridge = ProcessBridge::start(contract(), options).unwrap();

    let start = Instant::now();
    let status = bridge.shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(status.signal(), Some(9));
    assert!(bridge.pid().is_none());
}

#[test]
fn test_missing_worker_binary() {
    let temp = TempDir::new().unwrap();
    let options = BridgeOptions::new(vec!["/nonexistent/worker".into()]).with_work_dir(temp.path());
    assert!(ProcessBridge::start(contract(), options).is_err());
    assert!(!temp.path().join(".req.json").exists());
}
