//! Bridge between the call engine and an out-of-process worker.
//!
//! The worker is a long-lived subprocess started in the work directory. It
//! reads requests from `.req.json` and writes responses to `.resp.json`,
//! both named pipes created by the bridge. Besides ordinary calls the
//! bridge sends lifecycle control calls (`Iface.startup`, `Iface.shutdown`,
//! `Iface.preBatch`, `Iface.postBatch`) with request id `shcmd`.

mod channel;
mod scratch;

pub use channel::{Deadline, ProcessChannel};
pub use scratch::ScratchDirs;

use crate::config::{BridgeConfig, RpcConfig, Stack};
use crate::contract::Contract;
use crate::error::{Result, ShimError};
use crate::rpc::{id_to_string, parse_worker_response, Executor, WorkerRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the worker is started and stopped.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Directory the worker runs in. Pipes are created here.
    pub work_dir: PathBuf,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Extra environment variables for the worker.
    pub env_vars: HashMap<String, String>,
    /// Root for per-request scratch directories, relative to `work_dir`
    /// unless absolute.
    pub scratch_root: PathBuf,
    /// Upper bound on the whole shutdown sequence.
    pub shutdown_timeout: Duration,
    /// Send `Iface.startup` to every interface after spawning.
    pub startup_calls: bool,
    /// How often blocked pipe operations check that the worker is alive.
    pub poll_interval: Duration,
}

impl BridgeOptions {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            work_dir: PathBuf::from("."),
            command,
            env_vars: HashMap::new(),
            scratch_root: PathBuf::from(BridgeConfig::SCRATCH_DIR_NAME),
            shutdown_timeout: BridgeConfig::SHUTDOWN_TIMEOUT,
            startup_calls: true,
            poll_interval: BridgeConfig::LIVENESS_POLL_INTERVAL,
        }
    }

    /// Options using the stock launch command for `stack`.
    pub fn for_stack(stack: Stack) -> Self {
        Self::new(stack.launch_command().iter().map(|s| s.to_string()).collect())
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_startup_calls(mut self, enabled: bool) -> Self {
        self.startup_calls = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn req_pipe(&self) -> PathBuf {
        self.work_dir.join(BridgeConfig::REQ_PIPE_NAME)
    }

    pub fn resp_pipe(&self) -> PathBuf {
        self.work_dir.join(BridgeConfig::RESP_PIPE_NAME)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.work_dir.join(&self.scratch_root)
    }
}

/// Control calls sent to the worker outside normal dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Startup,
    Shutdown,
    PreBatch,
    PostBatch,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Startup => "startup",
            Lifecycle::Shutdown => "shutdown",
            Lifecycle::PreBatch => "preBatch",
            Lifecycle::PostBatch => "postBatch",
        }
    }

    fn request(&self, iface: &str) -> WorkerRequest {
        WorkerRequest::new(
            format!("{}.{}", iface, self.as_str()),
            &[],
            &Value::from(RpcConfig::CONTROL_REQ_ID),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Ready,
    Dispatching,
    ShuttingDown,
    Terminated,
}

/// Executor that forwards calls to a worker subprocess.
pub struct ProcessBridge {
    contract: Arc<Contract>,
    options: BridgeOptions,
    channel: Option<ProcessChannel>,
    scratch: ScratchDirs,
    state: BridgeState,
}

impl ProcessBridge {
    /// Create the pipes, spawn the worker and run the startup calls.
    pub fn start(contract: Arc<Contract>, options: BridgeOptions) -> Result<Self> {
        let channel = ProcessChannel::open(&options)?;
        let scratch = ScratchDirs::new(options.scratch_dir());
        let mut bridge = Self {
            contract,
            options,
            channel: Some(channel),
            scratch,
            state: BridgeState::Ready,
        };

        if bridge.options.startup_calls {
            let interfaces: Vec<String> = bridge
                .contract
                .interface_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            for iface in interfaces {
                if let Err(e) = bridge.lifecycle(&iface, Lifecycle::Startup) {
                    warn!("Startup call for {} failed: {}", iface, e);
                }
            }
        }
        Ok(bridge)
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Worker process id while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.channel.as_ref().map(ProcessChannel::pid)
    }

    fn channel(&mut self) -> Result<&mut ProcessChannel> {
        self.channel
            .as_mut()
            .ok_or_else(|| ShimError::internal("worker is not running"))
    }

    /// Forward one validated call and return the worker's result.
    ///
    /// The request's scratch directory is removed only when the call
    /// succeeds, so failed requests leave their files behind.
    pub fn call(&mut self, method: &str, params: &[Value], id: &Value) -> Result<Value> {
        let req_id = id_to_string(id);
        self.scratch.create(&req_id)?;

        let request = WorkerRequest::new(method, params, id);
        self.state = BridgeState::Dispatching;
        let result = self
            .channel()
            .and_then(|channel| channel.call(&request, None))
            .and_then(parse_worker_response);
        self.state = BridgeState::Ready;

        if result.is_ok() {
            if let Err(e) = self.scratch.remove(&req_id) {
                warn!("Failed to remove scratch dir for {}: {}", req_id, e);
            }
        }
        result
    }

    /// Send a lifecycle control call to `iface`.
    pub fn lifecycle(&mut self, iface: &str, cmd: Lifecycle) -> Result<()> {
        let channel = self.channel()?;
        control_call(channel, iface, cmd, None)
    }

    /// Tell every interface to shut down, then stop the worker.
    ///
    /// The whole sequence is bounded by the configured shutdown timeout; a
    /// worker that is still running when it expires is killed.
    pub fn shutdown(&mut self) -> Option<ExitStatus> {
        let mut channel = self.channel.take()?;
        self.state = BridgeState::ShuttingDown;
        let deadline = Deadline::after(self.options.shutdown_timeout);
        info!("Shutting down worker (pid {})", channel.pid());

        for iface in self.contract.interface_names() {
            match control_call(&mut channel, iface, Lifecycle::Shutdown, Some(deadline)) {
                Ok(()) => {}
                Err(ShimError::Timeout(limit)) => {
                    warn!("Worker did not finish shutdown within {:?}", limit);
                    break;
                }
                Err(e @ (ShimError::WorkerExited { .. } | ShimError::NonZeroExit { .. })) => {
                    debug!("Worker gone during shutdown: {}", e);
                    break;
                }
                Err(e) => warn!("Shutdown call for {} failed: {}", iface, e),
            }
        }

        let status = channel.terminate(deadline);
        drop(channel);
        self.state = BridgeState::Terminated;
        info!("Worker stopped: {:?}", status);
        status
    }
}

fn control_call(
    channel: &mut ProcessChannel,
    iface: &str,
    cmd: Lifecycle,
    deadline: Option<Deadline>,
) -> Result<()> {
    let request = cmd.request(iface);
    debug!("Control call {}", request.method);
    let result = channel.call(&request, deadline).and_then(parse_worker_response)?;
    debug!("Control call {} returned {}", request.method, result);
    Ok(())
}

impl Executor for ProcessBridge {
    fn execute(&mut self, method: &str, params: &[Value], id: &Value) -> Result<Value> {
        self.call(method, params, id)
    }

    fn before_batch(&mut self, iface: &str) -> Result<()> {
        self.lifecycle(iface, Lifecycle::PreBatch)
    }

    fn after_batch(&mut self, iface: &str) -> Result<()> {
        self.lifecycle(iface, Lifecycle::PostBatch)
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if self.channel.is_some() {
            self.shutdown();
        }
    }
}
