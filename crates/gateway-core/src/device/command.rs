//! Single-slot outstanding command, correlated by a monotonically
//! increasing per-device server flag (spec.md §4.2).

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Empty,
    Submitted,
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommandError;

impl fmt::Display for PendingCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a command is already outstanding for this device")
    }
}

impl std::error::Error for PendingCommandError {}

struct Inner {
    state: CommandState,
    server_flag_counter: u32,
    tracked_flag: Option<u32>,
    command: Option<String>,
    sent_at: Option<DateTime<Utc>>,
}

/// `empty → submitted → sent → empty`, or `submitted → empty` on a write
/// failure. One slot per device — a second `submit` while one is
/// outstanding is rejected unless `force` is set (used for the internal
/// read-deadline `STATUS#` probe, which must never be blocked by whatever
/// an operator happens to have queued).
pub struct PendingCommand {
    inner: Mutex<Inner>,
}

impl Default for PendingCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCommand {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CommandState::Empty,
                server_flag_counter: 0,
                tracked_flag: None,
                command: None,
                sent_at: None,
            }),
        }
    }

    /// Reserves the slot and returns the server flag to encode into the
    /// outbound frame.
    pub fn submit(&self, command: &str, force: bool) -> Result<u32, PendingCommandError> {
        let mut inner = self.inner.lock().expect("pending command mutex poisoned");
        if inner.state != CommandState::Empty && !force {
            return Err(PendingCommandError);
        }
        inner.server_flag_counter = inner.server_flag_counter.wrapping_add(1);
        let flag = inner.server_flag_counter;
        inner.tracked_flag = Some(flag);
        inner.command = Some(command.to_owned());
        inner.state = CommandState::Submitted;
        Ok(flag)
    }

    /// Marks the just-submitted command sent, after the frame has been
    /// written successfully.
    pub fn mark_sent(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("pending command mutex poisoned");
        if inner.state == CommandState::Submitted {
            inner.state = CommandState::Sent;
            inner.sent_at = Some(at);
        }
    }

    /// The write failed: the command never left, so the slot reverts to
    /// empty rather than waiting for a response that will never arrive.
    pub fn mark_send_failed(&self) {
        let mut inner = self.inner.lock().expect("pending command mutex poisoned");
        inner.state = CommandState::Empty;
        inner.tracked_flag = None;
        inner.command = None;
        inner.sent_at = None;
    }

    /// Clears the slot and returns the outstanding command's text if `flag`
    /// matches the tracked one. A mismatched flag is left untouched — the
    /// caller logs it as an unmatched response rather than clearing state
    /// that belongs to a different, still-outstanding command.
    pub fn resolve(&self, flag: u32) -> Option<String> {
        let mut inner = self.inner.lock().expect("pending command mutex poisoned");
        if inner.tracked_flag == Some(flag) {
            inner.state = CommandState::Empty;
            inner.tracked_flag = None;
            inner.sent_at = None;
            inner.command.take()
        } else {
            None
        }
    }

    pub fn state(&self) -> CommandState {
        self.inner.lock().expect("pending command mutex poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_sent_resolve_cycle() {
        let pending = PendingCommand::new();
        let flag = pending.submit("STATUS#", false).unwrap();
        assert_eq!(pending.state(), CommandState::Submitted);
        pending.mark_sent(Utc::now());
        assert_eq!(pending.state(), CommandState::Sent);
        let command = pending.resolve(flag).expect("resolves");
        assert_eq!(command, "STATUS#");
        assert_eq!(pending.state(), CommandState::Empty);
    }

    #[test]
    fn second_submit_rejected_unless_forced() {
        let pending = PendingCommand::new();
        pending.submit("RESET#", false).unwrap();
        assert!(pending.submit("STATUS#", false).is_err());
        assert!(pending.submit("STATUS#", true).is_ok());
    }

    #[test]
    fn send_failure_reverts_to_empty() {
        let pending = PendingCommand::new();
        pending.submit("RESET#", false).unwrap();
        pending.mark_send_failed();
        assert_eq!(pending.state(), CommandState::Empty);
        assert!(pending.submit("RESET#", false).is_ok());
    }

    #[test]
    fn mismatched_flag_does_not_clear_the_slot() {
        let pending = PendingCommand::new();
        let flag = pending.submit("RESET#", false).unwrap();
        pending.mark_sent(Utc::now());
        assert_eq!(pending.resolve(flag + 1), None);
        assert_eq!(pending.state(), CommandState::Sent);
    }

    #[test]
    fn server_flag_counter_is_monotonic_across_submits() {
        let pending = PendingCommand::new();
        let first = pending.submit("A#", false).unwrap();
        pending.mark_sent(Utc::now());
        pending.resolve(first).unwrap();
        let second = pending.submit("B#", false).unwrap();
        assert!(second > first);
    }
}
