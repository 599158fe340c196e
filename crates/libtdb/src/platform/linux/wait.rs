//! Raw `waitpid` / `tgkill` wrappers and the queue of statuses collected
//! while stopping threads.
//!
//! `waitpid` is called through libc so the raw status word survives for
//! [`DebugEvent::raw_status`](crate::event::DebugEvent::raw_status); nix's
//! `WaitStatus` is only used to decode it.

use std::collections::{HashSet, VecDeque};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::errors::TdbResult;
use crate::event::EventReason;

/// Non-blocking wait for any traced thread.
pub(super) fn poll_any() -> TdbResult<Option<(Pid, i32)>> {
    wait_raw(-1, libc::__WALL | libc::WNOHANG)
}

/// Blocking wait for any traced thread.
pub(super) fn wait_any() -> TdbResult<(Pid, i32)> {
    loop {
        if let Some(reported) = wait_raw(-1, libc::__WALL)? {
            return Ok(reported);
        }
    }
}

/// Blocking wait for one specific thread.
pub(super) fn wait_thread(tid: Pid) -> TdbResult<i32> {
    loop {
        if let Some((_, status)) = wait_raw(tid.as_raw(), libc::__WALL)? {
            return Ok(status);
        }
    }
}

fn wait_raw(target: libc::pid_t, flags: libc::c_int) -> TdbResult<Option<(Pid, i32)>> {
    let mut status: libc::c_int = 0;
    loop {
        let res = unsafe { libc::waitpid(target, &mut status, flags) };
        match res {
            -1 if Errno::last() == Errno::EINTR => continue,
            -1 => return Err(Errno::last().into()),
            0 => return Ok(None),
            tid => {
                log::debug!("waitpid: thread {tid} status {status:#x}");
                return Ok(Some((Pid::from_raw(tid), status)));
            }
        }
    }
}

/// Send `sig` to one thread of `pid`.
pub(super) fn tgkill(pid: Pid, tid: Pid, sig: Signal) -> TdbResult<()> {
    let res = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            pid.as_raw(),
            tid.as_raw(),
            sig as libc::c_int,
        )
    };
    Errno::result(res)?;
    Ok(())
}

/// Whether `status` is a plain signal-delivery stop for `SIGSTOP`.
pub(super) fn is_sigstop(status: i32) -> bool {
    libc::WIFSTOPPED(status) && libc::WSTOPSIG(status) == libc::SIGSTOP && (status >> 16) == 0
}

/// A status reported while the core was busy elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PendingStatus {
    pub tid: Pid,
    pub status: i32,
    /// Preset classification; `None` means decode `status` on replay.
    pub reason: Option<EventReason>,
}

/// First-observed-order queue of statuses awaiting replay.
#[derive(Debug, Default)]
pub(super) struct PendingEvents {
    queue: VecDeque<PendingStatus>,
    holders: HashSet<Pid>,
}

impl PendingEvents {
    pub fn push(&mut self, tid: Pid, status: i32) {
        self.push_status(PendingStatus {
            tid,
            status,
            reason: None,
        });
    }

    pub fn push_status(&mut self, pending: PendingStatus) {
        self.holders.insert(pending.tid);
        self.queue.push_back(pending);
    }

    pub fn pop(&mut self) -> Option<PendingStatus> {
        let next = self.queue.pop_front()?;
        if !self.queue.iter().any(|p| p.tid == next.tid) {
            self.holders.remove(&next.tid);
        }
        Some(next)
    }

    /// Whether `tid` has a status waiting; such threads are stopped and
    /// must not be resumed until it is replayed.
    pub fn holds(&self, tid: Pid) -> bool {
        self.holders.contains(&tid)
    }

    /// Drop everything queued for `tid`.
    pub fn discard(&mut self, tid: Pid) {
        self.queue.retain(|p| p.tid != tid);
        self.holders.remove(&tid);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.holders.clear();
    }
}
