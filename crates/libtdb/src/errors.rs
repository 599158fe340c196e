//! Error taxonomy for the debugger core.

use std::ffi::NulError;
use std::fmt;

use nix::errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::types::VirtAddr;

/// Unified result type across the debugger core.
pub type TdbResult<T> = Result<T, TdbError>;

/// Error cases
#[derive(Debug, Error)]
pub enum TdbError {
    #[error("permission denied while tracing process {0}")]
    PermissionDenied(Pid),

    #[error("no such process: {0}")]
    NoSuchProcess(Pid),

    #[error("process {pid} is already traced by {tracer}")]
    AlreadyTraced { pid: Pid, tracer: Pid },

    #[error("failed to spawn {path}: {reason}")]
    SpawnFailure { path: String, reason: String },

    /// A memory transfer stopped part-way; `transferred` bytes made it across.
    #[error("memory access fault at {address}: {transferred} of {requested} bytes transferred")]
    MemoryAccessFault {
        address: VirtAddr,
        transferred: usize,
        requested: usize,
    },

    #[error("malformed image: {0}")]
    MalformedImage(String),

    #[error("system call failed: {0}")]
    SysCall(#[from] errno::Errno),

    #[error("no process is being debugged")]
    NotAttached,

    #[error("thread {0} is not traced")]
    UnknownThread(Pid),

    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("C string error: {0}")]
    CStringError(#[from] NulError),
}

impl TdbError {
    /// The errno carried by a failed syscall, if any.
    pub fn errno(&self) -> Option<errno::Errno> {
        match self {
            Self::SysCall(errno) => Some(*errno),
            _ => None,
        }
    }
}

/// Per-thread failures collected by a best-effort bulk operation
/// (detach-all, kill-all, stop-all-threads).
///
/// An empty list means every thread was processed cleanly. A non-empty list
/// is a warning, not a failure of the whole operation.
#[derive(Debug, Default)]
pub struct ThreadFailures {
    failures: Vec<(Pid, TdbError)>,
}

impl ThreadFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, tid: Pid, error: TdbError) {
        log::warn!("thread {tid}: {error}");
        self.failures.push((tid, error));
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Threads that failed, in the order they were processed.
    pub fn threads(&self) -> impl Iterator<Item = Pid> + '_ {
        self.failures.iter().map(|(tid, _)| *tid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Pid, TdbError)> {
        self.failures.iter()
    }
}

impl fmt::Display for ThreadFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "all threads succeeded");
        }
        for (i, (tid, error)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "thread {tid}: {error}")?;
        }
        Ok(())
    }
}
