//! Out-of-band shutdown coordination.
//!
//! A [`ControlListener`] runs on its own thread and waits for control
//! messages. When told to stop it waits on the [`ExitGate`] until no
//! request is in flight, then runs the shutdown hook. The dispatch side
//! holds an [`InFlight`] guard for the duration of every request.

use crate::error::Result;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mutex/condvar pair guarding a single "may exit now" flag.
#[derive(Debug, Clone)]
pub struct ExitGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for ExitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitGate {
    /// Create a gate that starts out idle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a request as in flight until the returned guard is dropped.
    pub fn enter(&self) -> InFlight {
        *self.lock() = false;
        InFlight { gate: self.clone() }
    }

    pub fn can_exit(&self) -> bool {
        *self.lock()
    }

    /// Block until no request is in flight.
    pub fn wait_idle(&self) {
        let cvar = &self.inner.1;
        let guard = self.lock();
        let _guard = cvar
            .wait_while(guard, |can_exit| !*can_exit)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until idle or until `timeout` passes. Returns whether idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let cvar = &self.inner.1;
        let guard = self.lock();
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |can_exit| !*can_exit)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn release(&self) {
        *self.lock() = true;
        self.inner.1.notify_all();
    }
}

/// Held while a request is being dispatched.
#[derive(Debug)]
pub struct InFlight {
    gate: ExitGate,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Messages accepted by the control listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Kill,
    Unknown(String),
}

impl ControlMessage {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "kill" | "KILL" => ControlMessage::Kill,
            other => ControlMessage::Unknown(other.to_string()),
        }
    }
}

/// Thread that waits for a kill message and then shuts down cleanly.
pub struct ControlListener {
    sender: Sender<ControlMessage>,
    handle: JoinHandle<()>,
}

impl ControlListener {
    /// Start the listener. `on_kill` runs once the gate is idle.
    pub fn spawn<F>(gate: ExitGate, on_kill: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("shimrpc-control".to_string())
            .spawn(move || listen(receiver, gate, on_kill))?;
        Ok(Self { sender, handle })
    }

    pub fn send(&self, message: ControlMessage) {
        if self.sender.send(message).is_err() {
            debug!("Control listener already stopped");
        }
    }

    /// Wait for the listener thread to finish.
    ///
    /// Returns once a kill was handled or every sender is gone.
    pub fn join(self) {
        let Self { sender, handle } = self;
        drop(sender);
        if handle.join().is_err() {
            warn!("Control listener thread panicked");
        }
    }
}

fn listen<F: FnOnce()>(receiver: Receiver<ControlMessage>, gate: ExitGate, on_kill: F) {
    for message in receiver {
        match message {
            ControlMessage::Kill => {
                info!("Kill requested, waiting for in-flight request");
                gate.wait_idle();
                on_kill();
                return;
            }
            ControlMessage::Unknown(text) => warn!("Unknown control message: {}", text),
        }
    }
    debug!("Control channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_gate_starts_idle() {
        let gate = ExitGate::new();
        assert!(gate.can_exit());
        let guard = gate.enter();
        assert!(!gate.can_exit());
        drop(guard);
        assert!(gate.can_exit());
    }

    #[test]
    fn test_wait_idle_blocks_until_guard_dropped() {
        let gate = ExitGate::new();
        let guard = gate.enter();
        let done = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let done = done.clone();
            thread::spawn(move || {
                gate.wait_idle();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        drop(guard);
        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_idle_timeout() {
        let gate = ExitGate::new();
        let _guard = gate.enter();
        assert!(!gate.wait_idle_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_listener_defers_kill_until_idle() {
        let gate = ExitGate::new();
        let guard = gate.enter();
        let (tx, rx) = mpsc::channel();

        let listener = ControlListener::spawn(gate.clone(), move || {
            tx.send(()).unwrap();
        })
        .unwrap();

        listener.send(ControlMessage::Unknown("status".into()));
        listener.send(ControlMessage::Kill);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        listener.join();
    }

    #[test]
    fn test_parse_message() {
        assert_eq!(ControlMessage::parse("kill\n"), ControlMessage::Kill);
        assert_eq!(
            ControlMessage::parse("pause"),
            ControlMessage::Unknown("pause".into())
        );
    }
}
