//! Debug events produced by the core's wait operation.
//!
//! A [`DebugEvent`] is immutable: the raw wait status, the thread that
//! produced it and the classified [`EventReason`]. Signal-delivery stops also
//! carry the kernel's [`SignalInfo`].

use std::fmt;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

#[cfg(target_os = "linux")]
use nix::sys::wait::WaitStatus;

#[cfg(target_os = "linux")]
use crate::errors::TdbResult;
use crate::types::VirtAddr;

/// Why a thread reported a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    /// Signal-delivery stop (includes `SIGTRAP` from breakpoints and steps).
    Stopped(Signal),
    /// The thread exited normally with the given code.
    Exited(i32),
    /// The thread was killed by a signal.
    Terminated(Signal),
    /// The thread created a new thread with the given tid.
    Cloned(Pid),
    /// The process image was replaced by `execve`.
    ExecTransition,
    /// Syscall entry or exit stop.
    SyscallBoundary,
}

/// Signals that indicate a fault in the debuggee rather than a routine stop.
const FAULT_SIGNALS: [Signal; 10] = [
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGPIPE,
    Signal::SIGSTKFLT,
    Signal::SIGSYS,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
];

/// `si_code` and faulting address of a signal, from `PTRACE_GETSIGINFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    code: i32,
    fault_address: Option<VirtAddr>,
}

impl SignalInfo {
    pub fn new(code: i32, fault_address: Option<VirtAddr>) -> Self {
        Self {
            code,
            fault_address,
        }
    }

    /// Raw `si_code`.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Address that caused a memory, instruction or arithmetic fault.
    pub fn fault_address(&self) -> Option<VirtAddr> {
        self.fault_address
    }

    /// Sent with `kill`, `tgkill` or `sigqueue` rather than raised by the
    /// kernel. Kernel codes are positive.
    pub fn is_user_sent(&self) -> bool {
        self.code <= 0
    }
}

#[cfg(target_os = "linux")]
impl From<&libc::siginfo_t> for SignalInfo {
    fn from(info: &libc::siginfo_t) -> Self {
        let faulting = matches!(
            info.si_signo,
            libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE
        ) && info.si_code > 0
            && info.si_code != libc::SI_KERNEL;
        // SAFETY: `si_addr` is the active union member for kernel-raised
        // faults, which is all `faulting` admits.
        let fault_address = faulting.then(|| VirtAddr(unsafe { info.si_addr() } as u64));
        Self::new(info.si_code, fault_address)
    }
}

/// A single classified stop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEvent {
    tid: Pid,
    status: i32,
    reason: EventReason,
    signal_info: Option<SignalInfo>,
}

impl DebugEvent {
    pub(crate) fn new(tid: Pid, status: i32, reason: EventReason) -> Self {
        Self {
            tid,
            status,
            reason,
            signal_info: None,
        }
    }

    pub(crate) fn with_signal_info(mut self, info: Option<SignalInfo>) -> Self {
        self.signal_info = info;
        self
    }

    /// Thread that produced the notification.
    pub fn tid(&self) -> Pid {
        self.tid
    }

    /// Raw status word as returned by `waitpid`.
    pub fn raw_status(&self) -> i32 {
        self.status
    }

    pub fn reason(&self) -> EventReason {
        self.reason
    }

    /// Signal delivered to the thread, when it stopped on one.
    pub fn stop_signal(&self) -> Option<Signal> {
        match self.reason {
            EventReason::Stopped(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.reason {
            EventReason::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Kernel details of the stop signal, for signal-delivery stops.
    pub fn signal_info(&self) -> Option<SignalInfo> {
        self.signal_info
    }

    pub fn signal_code(&self) -> Option<i32> {
        self.signal_info.map(|info| info.code())
    }

    /// Where a `SIGSEGV`, `SIGBUS`, `SIGILL` or `SIGFPE` hit.
    pub fn fault_address(&self) -> Option<VirtAddr> {
        self.signal_info.and_then(|info| info.fault_address())
    }

    /// The stop signal came from another process or thread.
    pub fn is_user_sent(&self) -> bool {
        self.signal_info.is_some_and(|info| info.is_user_sent())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.reason, EventReason::Stopped(_))
    }

    pub fn is_trap(&self) -> bool {
        self.stop_signal() == Some(Signal::SIGTRAP)
    }

    /// Whether the thread is gone after this event.
    pub fn is_exit(&self) -> bool {
        matches!(
            self.reason,
            EventReason::Exited(_) | EventReason::Terminated(_)
        )
    }

    /// True when the event reports a fault (crash-class signal), either as a
    /// stop or as the signal that terminated the thread.
    pub fn is_error(&self) -> bool {
        match self.reason {
            EventReason::Stopped(sig) | EventReason::Terminated(sig) => {
                FAULT_SIGNALS.contains(&sig)
            }
            _ => false,
        }
    }

    /// Short description of the fault, for error events.
    pub fn error_description(&self) -> Option<&'static str> {
        if !self.is_error() {
            return None;
        }
        let sig = match self.reason {
            EventReason::Stopped(sig) | EventReason::Terminated(sig) => sig,
            _ => return None,
        };
        Some(match sig {
            Signal::SIGILL => "illegal instruction",
            Signal::SIGABRT => "aborted",
            Signal::SIGBUS => "bus error",
            Signal::SIGFPE => "floating point exception",
            Signal::SIGSEGV => "segmentation fault",
            Signal::SIGPIPE => "broken pipe",
            Signal::SIGSTKFLT => "stack fault",
            Signal::SIGSYS => "bad system call",
            Signal::SIGXCPU => "CPU time limit exceeded",
            Signal::SIGXFSZ => "file size limit exceeded",
            _ => "fault",
        })
    }
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            EventReason::Stopped(sig) => write!(f, "thread {} stopped with {sig}", self.tid)?,
            EventReason::Exited(code) => write!(f, "thread {} exited with code {code}", self.tid)?,
            EventReason::Terminated(sig) => {
                write!(f, "thread {} terminated by {sig}", self.tid)?
            }
            EventReason::Cloned(child) => write!(f, "thread {} created thread {child}", self.tid)?,
            EventReason::ExecTransition => write!(f, "thread {} executed a new image", self.tid)?,
            EventReason::SyscallBoundary => write!(f, "thread {} at a syscall boundary", self.tid)?,
        }
        if let Some(description) = self.error_description() {
            write!(f, " ({description}")?;
            if let Some(addr) = self.fault_address() {
                write!(f, " at {addr}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Classify a decoded wait status.
///
/// `event_message` fetches `PTRACE_GETEVENTMSG` for the reporting thread and
/// is only consulted for clone events. Returns `None` for statuses that never
/// reach a tracer waiting with `__WALL` (continued, still alive).
#[cfg(target_os = "linux")]
pub(crate) fn classify(
    status: WaitStatus,
    event_message: impl FnOnce(Pid) -> TdbResult<libc::c_long>,
) -> TdbResult<Option<EventReason>> {
    let reason = match status {
        WaitStatus::Exited(_, code) => EventReason::Exited(code),
        WaitStatus::Signaled(_, sig, _) => EventReason::Terminated(sig),
        WaitStatus::Stopped(_, sig) => EventReason::Stopped(sig),
        WaitStatus::PtraceSyscall(_) => EventReason::SyscallBoundary,
        WaitStatus::PtraceEvent(tid, sig, event) => match event {
            libc::PTRACE_EVENT_CLONE => {
                let child = event_message(tid)?;
                EventReason::Cloned(Pid::from_raw(child as i32))
            }
            libc::PTRACE_EVENT_EXEC => EventReason::ExecTransition,
            _ => EventReason::Stopped(sig),
        },
        WaitStatus::Continued(_) | WaitStatus::StillAlive => return Ok(None),
    };
    Ok(Some(reason))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::errors::TdbError;

    const TID: i32 = 100;

    fn stopped(sig: i32) -> i32 {
        (sig << 8) | 0x7f
    }

    fn ptrace_event(event: i32) -> i32 {
        (event << 16) | stopped(libc::SIGTRAP)
    }

    fn classify_raw(status: i32) -> Option<EventReason> {
        let status = WaitStatus::from_raw(Pid::from_raw(TID), status).unwrap();
        classify(status, |_| Ok(4242)).unwrap()
    }

    #[test]
    fn exit_and_termination() {
        assert_eq!(classify_raw(3 << 8), Some(EventReason::Exited(3)));
        assert_eq!(
            classify_raw(libc::SIGKILL),
            Some(EventReason::Terminated(Signal::SIGKILL))
        );
    }

    #[test]
    fn signal_stops() {
        assert_eq!(
            classify_raw(stopped(libc::SIGTRAP)),
            Some(EventReason::Stopped(Signal::SIGTRAP))
        );
        assert_eq!(
            classify_raw(stopped(libc::SIGSEGV)),
            Some(EventReason::Stopped(Signal::SIGSEGV))
        );
    }

    #[test]
    fn syscall_stop_uses_sysgood_bit() {
        assert_eq!(
            classify_raw(stopped(libc::SIGTRAP | 0x80)),
            Some(EventReason::SyscallBoundary)
        );
    }

    #[test]
    fn clone_event_reads_new_tid() {
        assert_eq!(
            classify_raw(ptrace_event(libc::PTRACE_EVENT_CLONE)),
            Some(EventReason::Cloned(Pid::from_raw(4242)))
        );
    }

    #[test]
    fn clone_event_propagates_message_failure() {
        let status =
            WaitStatus::from_raw(Pid::from_raw(TID), ptrace_event(libc::PTRACE_EVENT_CLONE))
                .unwrap();
        let result = classify(status, |_| Err(TdbError::SysCall(nix::errno::Errno::ESRCH)));
        assert!(matches!(result, Err(TdbError::SysCall(nix::errno::Errno::ESRCH))));
    }

    #[test]
    fn exec_event() {
        assert_eq!(
            classify_raw(ptrace_event(libc::PTRACE_EVENT_EXEC)),
            Some(EventReason::ExecTransition)
        );
    }

    #[test]
    fn unknown_ptrace_event_is_a_trap_stop() {
        assert_eq!(
            classify_raw(ptrace_event(libc::PTRACE_EVENT_VFORK_DONE)),
            Some(EventReason::Stopped(Signal::SIGTRAP))
        );
    }

    #[test]
    fn continued_is_not_an_event() {
        assert_eq!(classify_raw(0xffff), None);
    }

    #[test]
    fn event_queries() {
        let tid = Pid::from_raw(TID);
        let segv = DebugEvent::new(tid, stopped(libc::SIGSEGV), EventReason::Stopped(Signal::SIGSEGV));
        assert_eq!(segv.tid(), tid);
        assert!(segv.is_stop());
        assert!(segv.is_error());
        assert!(!segv.is_trap());
        assert_eq!(segv.stop_signal(), Some(Signal::SIGSEGV));
        assert_eq!(segv.error_description(), Some("segmentation fault"));
        assert_eq!(segv.to_string(), "thread 100 stopped with SIGSEGV (segmentation fault)");

        let trap = DebugEvent::new(tid, stopped(libc::SIGTRAP), EventReason::Stopped(Signal::SIGTRAP));
        assert!(trap.is_trap());
        assert!(!trap.is_error());
        assert_eq!(trap.error_description(), None);

        assert_eq!(segv.fault_address(), None);

        let exit = DebugEvent::new(tid, 0, EventReason::Exited(0));
        assert!(exit.is_exit());
        assert_eq!(exit.exit_code(), Some(0));
        assert_eq!(exit.stop_signal(), None);
        assert_eq!(exit.raw_status(), 0);
    }

    /// `si_code` of a fault on an unmapped address.
    const SEGV_MAPERR: i32 = 1;

    #[test]
    fn fault_details_from_siginfo() {
        let tid = Pid::from_raw(TID);
        let info = SignalInfo::new(SEGV_MAPERR, Some(VirtAddr(0x10)));
        let segv = DebugEvent::new(tid, stopped(libc::SIGSEGV), EventReason::Stopped(Signal::SIGSEGV))
            .with_signal_info(Some(info));
        assert_eq!(segv.fault_address(), Some(VirtAddr(0x10)));
        assert_eq!(segv.signal_code(), Some(SEGV_MAPERR));
        assert!(!segv.is_user_sent());
        assert_eq!(
            segv.to_string(),
            "thread 100 stopped with SIGSEGV (segmentation fault at 0x10)"
        );
    }

    #[test]
    fn user_sent_signals_have_non_positive_codes() {
        let tid = Pid::from_raw(TID);
        let sent = DebugEvent::new(tid, stopped(libc::SIGTRAP), EventReason::Stopped(Signal::SIGTRAP))
            .with_signal_info(Some(SignalInfo::new(libc::SI_TKILL, None)));
        assert!(sent.is_trap());
        assert!(sent.is_user_sent());

        let breakpoint = DebugEvent::new(tid, stopped(libc::SIGTRAP), EventReason::Stopped(Signal::SIGTRAP))
            .with_signal_info(Some(SignalInfo::new(libc::SI_KERNEL, None)));
        assert!(!breakpoint.is_user_sent());

        let bare = DebugEvent::new(tid, stopped(libc::SIGTRAP), EventReason::Stopped(Signal::SIGTRAP));
        assert!(!bare.is_user_sent());
        assert_eq!(bare.signal_code(), None);
    }
}
