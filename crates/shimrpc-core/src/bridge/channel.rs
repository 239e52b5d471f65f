//! Named-pipe channel to a worker subprocess.
//!
//! One request is in flight at a time. The host writes a complete JSON
//! document to the request pipe and closes it, then reads one JSON document
//! back from the response pipe. Neither side is allowed to block forever on
//! a worker that has died: every wait polls the child's exit status.

use super::BridgeOptions;
use crate::config::BridgeConfig;
use crate::error::{Result, ShimError};
use crate::rpc::WorkerRequest;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{killpg, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, Pid};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    fn check(&self) -> Result<()> {
        if self.expired() {
            Err(ShimError::Timeout(self.limit))
        } else {
            Ok(())
        }
    }
}

fn check_deadline(deadline: Option<Deadline>) -> Result<()> {
    deadline.map_or(Ok(()), |d| d.check())
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Worker subprocess plus its request/response pipes.
#[derive(Debug)]
pub struct ProcessChannel {
    req_path: PathBuf,
    resp_path: PathBuf,
    child: Child,
    stderr_tail: StderrTail,
    output_threads: Vec<JoinHandle<()>>,
    poll_interval: Duration,
}

impl ProcessChannel {
    /// Create both pipes and spawn the worker.
    pub fn open(options: &BridgeOptions) -> Result<Self> {
        let req_path = options.req_pipe();
        let resp_path = options.resp_pipe();
        create_fifo(&req_path)?;
        if let Err(e) = create_fifo(&resp_path) {
            let _ = fs::remove_file(&req_path);
            return Err(e);
        }

        let child = match spawn_worker(options) {
            Ok(child) => child,
            Err(e) => {
                let _ = fs::remove_file(&req_path);
                let _ = fs::remove_file(&resp_path);
                return Err(e);
            }
        };

        let mut channel = Self {
            req_path,
            resp_path,
            child,
            stderr_tail: Arc::new(Mutex::new(VecDeque::new())),
            output_threads: Vec::new(),
            poll_interval: options.poll_interval,
        };
        channel.capture_output();
        info!("Started worker (pid {})", channel.pid());
        Ok(channel)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn request_pipe(&self) -> &Path {
        &self.req_path
    }

    pub fn response_pipe(&self) -> &Path {
        &self.resp_path
    }

    /// Send one request and wait for its response document.
    pub fn call(&mut self, request: &WorkerRequest, deadline: Option<Deadline>) -> Result<Value> {
        self.check_alive()?;
        self.send(request, deadline)?;
        self.receive(deadline)
    }

    /// Write a request document once the worker has the pipe open.
    pub fn send(&mut self, request: &WorkerRequest, deadline: Option<Deadline>) -> Result<()> {
        let doc = serde_json::to_vec(request)?;

        // A non-blocking writer open fails with ENXIO until a reader exists
        let probe = loop {
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.req_path)
            {
                Ok(file) => break file,
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                    self.check_alive()?;
                    check_deadline(deadline)?;
                    thread::sleep(self.poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ShimError::io_with_path(e, &self.req_path)),
            }
        };

        let mut writer = OpenOptions::new()
            .write(true)
            .open(&self.req_path)
            .map_err(|e| ShimError::io_with_path(e, &self.req_path))?;
        drop(probe);

        if let Err(e) = writer.write_all(&doc).and_then(|_| writer.flush()) {
            // A broken pipe usually means the worker went away mid-read
            self.check_alive()?;
            return Err(ShimError::io_with_path(e, &self.req_path));
        }
        debug!("Sent {} bytes to worker", doc.len());
        Ok(())
    }

    /// Read one complete JSON document from the response pipe.
    pub fn receive(&mut self, deadline: Option<Deadline>) -> Result<Value> {
        // Read-write so the open never blocks and the pipe has a reader
        // before the worker opens its end
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.resp_path)
            .map_err(|e| ShimError::io_with_path(e, &self.resp_path))?;

        let timeout = PollTimeout::from(
            u16::try_from(self.poll_interval.as_millis()).unwrap_or(u16::MAX),
        );
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; BridgeConfig::READ_CHUNK_SIZE];

        loop {
            let ready = {
                let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, timeout) {
                    Ok(n) => n,
                    Err(Errno::EINTR) => 0,
                    Err(e) => return Err(ShimError::io_with_path(e.into(), &self.resp_path)),
                }
            };

            if ready == 0 {
                self.check_alive()?;
                check_deadline(deadline)?;
                continue;
            }

            let n = match file.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ShimError::io_with_path(e, &self.resp_path)),
            };
            buf.extend_from_slice(&chunk[..n]);

            match serde_json::Deserializer::from_slice(&buf)
                .into_iter::<Value>()
                .next()
            {
                Some(Ok(value)) => {
                    debug!("Received {} bytes from worker", buf.len());
                    return Ok(value);
                }
                Some(Err(e)) if e.is_eof() => {}
                None => {}
                Some(Err(e)) => {
                    return Err(ShimError::Protocol {
                        message: format!("invalid response document: {}", e),
                    })
                }
            }
        }
    }

    /// Whether the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Error out if the worker has exited.
    fn check_alive(&mut self) -> Result<()> {
        match self.child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(self.exit_error(status)),
            Err(e) => Err(e.into()),
        }
    }

    fn exit_error(&self, status: ExitStatus) -> ShimError {
        self.settle_output();
        let stderr = self.stderr_text();
        match (status.code(), status.signal()) {
            (Some(0), _) => ShimError::WorkerExited { status: 0 },
            (Some(code), _) => {
                error!("Worker exited with status {}", code);
                ShimError::NonZeroExit {
                    exit_code: code,
                    stderr,
                }
            }
            (None, Some(signal)) => {
                error!("Worker killed by signal {}", signal);
                ShimError::NonZeroExit {
                    exit_code: 128 + signal,
                    stderr,
                }
            }
            (None, None) => ShimError::WorkerExited { status: -1 },
        }
    }

    /// Last lines the worker wrote to stderr.
    pub fn stderr_text(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Give the output readers a moment to drain after the worker exits.
    fn settle_output(&self) {
        let until = Instant::now() + BridgeConfig::OUTPUT_SETTLE;
        while Instant::now() < until && self.output_threads.iter().any(|h| !h.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn capture_output(&mut self) {
        if let Some(stdout) = self.child.stdout.take() {
            match spawn_reader("stdout", stdout, None) {
                Ok(handle) => self.output_threads.push(handle),
                Err(e) => warn!("Failed to capture worker stdout: {}", e),
            }
        }
        if let Some(stderr) = self.child.stderr.take() {
            match spawn_reader("stderr", stderr, Some(self.stderr_tail.clone())) {
                Ok(handle) => self.output_threads.push(handle),
                Err(e) => warn!("Failed to capture worker stderr: {}", e),
            }
        }
    }

    /// Stop the worker: SIGTERM to its process group, then SIGKILL once
    /// `deadline` passes.
    pub fn terminate(&mut self, deadline: Deadline) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Worker already exited: {}", status);
            return Some(status);
        }

        let pgid = Pid::from_raw(self.child.id() as i32);
        debug!("Sending SIGTERM to worker group {}", pgid);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            if e != Errno::ESRCH {
                warn!("Failed to send SIGTERM to {}: {}", pgid, e);
            }
        }

        while !deadline.expired() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Worker terminated gracefully: {}", status);
                    return Some(status);
                }
                Ok(None) => thread::sleep(self.poll_interval.min(deadline.remaining())),
                Err(e) => {
                    warn!("Failed to poll worker: {}", e);
                    break;
                }
            }
        }

        error!("Worker still running after {:?}, killing", deadline.limit);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            if e != Errno::ESRCH {
                warn!("Failed to send SIGKILL to {}: {}", pgid, e);
            }
        }
        match self.child.wait() {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Failed to reap worker: {}", e);
                None
            }
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if self.is_alive() {
            self.terminate(Deadline::after(BridgeConfig::TERMINATE_GRACE));
        }
        for path in [&self.req_path, &self.resp_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Create a named pipe, replacing a stale file left by an earlier run.
fn create_fifo(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed stale pipe {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ShimError::io_with_path(e, path)),
    }
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|e| ShimError::io_with_path(e.into(), path))
}

fn spawn_worker(options: &BridgeOptions) -> Result<Child> {
    let (program, args) = options.command.split_first().ok_or_else(|| ShimError::Config {
        message: "worker command is empty".to_string(),
    })?;

    debug!("Spawning worker: {}", options.command.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&options.work_dir)
        .envs(&options.env_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Own process group so termination reaches the worker's children
        .process_group(0);

    cmd.spawn().map_err(|e| {
        error!("Failed to spawn worker {}: {}", program, e);
        ShimError::io_with_path(e, PathBuf::from(program))
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    stream: R,
    tail: Option<StderrTail>,
) -> io::Result<JoinHandle<()>> {
    let label = name.to_string();
    thread::Builder::new()
        .name(format!("shimrpc-worker-{}", name))
        .spawn(move || {
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                match &tail {
                    Some(tail) => {
                        warn!("Worker {} - {}", label, line);
                        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                        if tail.len() == BridgeConfig::STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    None => debug!("Worker {} - {}", label, line),
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tempfile::TempDir;

    fn sh(dir: &Path, script: &str) -> BridgeOptions {
        BridgeOptions::new(vec!["/bin/sh".into(), "-c".into(), script.into()])
            .with_work_dir(dir)
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_round_trip_and_cleanup() {
        let temp = TempDir::new().unwrap();
        let options = sh(
            temp.path(),
            "while true; do cat .req.json > /dev/null; printf '{\"result\": 7}' > .resp.json; done",
        );

        let mut channel = ProcessChannel::open(&options).unwrap();
        assert!(fs::metadata(channel.request_pipe()).unwrap().file_type().is_fifo());

        let req = WorkerRequest::new("Default.f", &[], &Value::from(1));
        for _ in 0..3 {
            let resp = channel.call(&req, None).unwrap();
            assert_eq!(resp["result"], 7);
        }

        let req_pipe = channel.request_pipe().to_path_buf();
        drop(channel);
        assert!(!req_pipe.exists());
        assert!(!temp.path().join(".resp.json").exists());
    }

    #[test]
    fn test_exit_before_reading_is_reported() {
        let temp = TempDir::new().unwrap();
        let options = sh(temp.path(), "echo oops >&2; exit 4");

        let mut channel = ProcessChannel::open(&options).unwrap();
        let req = WorkerRequest::new("Default.f", &[], &Value::from(1));
        match channel.call(&req, None) {
            Err(ShimError::NonZeroExit { exit_code, stderr }) => {
                assert_eq!(exit_code, 4);
                assert!(stderr.contains("oops"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_receive_times_out() {
        let temp = TempDir::new().unwrap();
        let options = sh(temp.path(), "cat .req.json > /dev/null; sleep 30");

        let mut channel = ProcessChannel::open(&options).unwrap();
        let req = WorkerRequest::new("Default.f", &[], &Value::from(1));
        let start = Instant::now();
        let err = channel
            .call(&req, Some(Deadline::after(Duration::from_millis(200))))
            .unwrap_err();
        assert!(matches!(err, ShimError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));

        let status = channel.terminate(Deadline::after(Duration::from_millis(200)));
        assert!(status.is_some());
        assert!(!channel.is_alive());
    }

    #[test]
    fn test_malformed_response_is_protocol_error() {
        let temp = TempDir::new().unwrap();
        let options = sh(
            temp.path(),
            "cat .req.json > /dev/null; printf '{\"result\": ]' > .resp.json; sleep 5",
        );

        let mut channel = ProcessChannel::open(&options).unwrap();
        let req = WorkerRequest::new("Default.f", &[], &Value::from(1));
        let err = channel.call(&req, None).unwrap_err();
        assert!(matches!(err, ShimError::Protocol { .. }));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let temp = TempDir::new().unwrap();
        let options = BridgeOptions::new(Vec::new()).with_work_dir(temp.path());
        let err = ProcessChannel::open(&options).unwrap_err();
        assert!(matches!(err, ShimError::Config { .. }));
        assert!(!temp.path().join(".req.json").exists());
    }
}
