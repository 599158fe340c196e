//! Per-thread bookkeeping owned by the debugger core.
//!
//! Callers get read-only access; the lifecycle transitions and the register
//! cache are only reachable from inside the crate.

use std::fmt;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::registers::RegisterState;

/// Lifecycle of a traced thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Stopped,
    Exited,
    Detached,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::Running => "running",
            ThreadState::Stopped => "stopped",
            ThreadState::Exited => "exited",
            ThreadState::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// A thread under trace.
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    tid: Pid,
    state: ThreadState,
    last_status: Option<i32>,
    /// Signal to hand back to the thread when it is next resumed.
    pending_signal: Option<Signal>,
    /// We sent it a `SIGSTOP` whose stop has not been consumed yet.
    expecting_stop: bool,
    registers: Option<RegisterState>,
    registers_valid: bool,
}

impl ThreadHandle {
    pub(crate) fn new(tid: Pid, state: ThreadState) -> Self {
        Self {
            tid,
            state,
            last_status: None,
            pending_signal: None,
            expecting_stop: false,
            registers: None,
            registers_valid: false,
        }
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ThreadState::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.state == ThreadState::Running
    }

    /// Raw wait status of the most recent stop or exit.
    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    pub fn pending_signal(&self) -> Option<Signal> {
        self.pending_signal
    }

    /// Last register snapshot, valid or not.
    pub fn cached_registers(&self) -> Option<&RegisterState> {
        self.registers.as_ref()
    }

    /// Snapshot still describing the thread, if one was fetched since the
    /// last resume.
    pub(crate) fn fresh_registers(&self) -> Option<&RegisterState> {
        self.registers.as_ref().filter(|_| self.registers_valid)
    }

    pub(crate) fn cache_registers(&mut self, state: RegisterState) {
        self.registers = Some(state);
        self.registers_valid = true;
    }

    pub(crate) fn invalidate_registers(&mut self) {
        self.registers_valid = false;
    }

    pub(crate) fn mark_stopped(&mut self, status: i32, signal: Option<Signal>) {
        self.state = ThreadState::Stopped;
        self.last_status = Some(status);
        self.pending_signal = signal;
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = ThreadState::Running;
        self.pending_signal = None;
        self.invalidate_registers();
    }

    pub(crate) fn mark_exited(&mut self, status: i32) {
        self.state = ThreadState::Exited;
        self.last_status = Some(status);
        self.pending_signal = None;
        self.invalidate_registers();
    }

    pub(crate) fn mark_detached(&mut self) {
        self.state = ThreadState::Detached;
        self.invalidate_registers();
    }

    pub(crate) fn expecting_stop(&self) -> bool {
        self.expecting_stop
    }

    pub(crate) fn set_expecting_stop(&mut self, expecting: bool) {
        self.expecting_stop = expecting;
    }
}
