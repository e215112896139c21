//! Shared per-device session plumbing: the running-state machine and the
//! current/next connection slots, used by both the GT06 and SimpleJSON
//! handlers (spec.md §4.2; §4.3 mirrors it for reconnection and
//! replacement).

pub mod command;
pub mod gt06;
pub mod simplejson;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::conn::SharedConn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    Created,
    Running,
    Paused,
}

/// Holds the live connection under a read-write lock (readers: the message
/// loop, the command-send path; writer: reconnect takeover) plus a
/// separately-locked single-slot "next connection" queue, so queuing a
/// replacement never blocks on whatever is holding the read-write lock.
pub struct ConnSlot {
    current: RwLock<SharedConn>,
    next: Mutex<Option<SharedConn>>,
}

impl ConnSlot {
    pub fn new(conn: SharedConn) -> Self {
        Self { current: RwLock::new(conn), next: Mutex::new(None) }
    }

    pub fn current(&self) -> SharedConn {
        self.current.read().expect("conn slot read lock poisoned").clone()
    }

    pub fn set_current(&self, conn: SharedConn) {
        *self.current.write().expect("conn slot write lock poisoned") = conn;
    }

    /// Overwrites any previously queued connection; depth is always at most
    /// one (a reconnect that races the cool-off wins over whichever one
    /// queued first).
    pub fn queue_next(&self, conn: SharedConn) {
        *self.next.lock().expect("conn slot next-queue mutex poisoned") = Some(conn);
    }

    pub fn take_next(&self) -> Option<SharedConn> {
        self.next.lock().expect("conn slot next-queue mutex poisoned").take()
    }
}

/// The `created → running → paused → running → …` state machine plus the
/// orthogonal `stopped` latch. Each protocol handler embeds one rather than
/// sharing a base type.
pub struct RunState {
    state: Mutex<RunningState>,
    stopped: AtomicBool,
}

impl Default for RunState {
    fn default() -> Self {
        Self { state: Mutex::new(RunningState::Created), stopped: AtomicBool::new(false) }
    }
}

impl RunState {
    pub fn get(&self) -> RunningState {
        *self.state.lock().expect("run state mutex poisoned")
    }

    pub fn set(&self, s: RunningState) {
        *self.state.lock().expect("run state mutex poisoned") = s;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn latch_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_defaults_to_created_and_not_stopped() {
        let run = RunState::default();
        assert_eq!(run.get(), RunningState::Created);
        assert!(!run.is_stopped());
        run.set(RunningState::Running);
        assert_eq!(run.get(), RunningState::Running);
        run.latch_stopped();
        assert!(run.is_stopped());
    }
}
