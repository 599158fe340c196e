//! ptrace-based debugger core for Linux on x86-64.
//!
//! All-stop model: when [`DebuggerCore::wait_debug_event`] hands out an
//! event, every other traced thread has been stopped with `SIGSTOP`. Statuses
//! collected while stopping them are queued and handed out one at a time
//! after the active thread is resumed.

mod launch;
mod wait;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, Pid, SysconfVar};

use crate::binary::{self, BinaryImage};
use crate::config::DebuggerConfig;
use crate::debugger::{Debugger, SignalDisposition};
use crate::errors::{TdbError, TdbResult, ThreadFailures};
use crate::event::{self, DebugEvent, EventReason, SignalInfo};
use crate::memory::MemoryAccess;
use crate::process::ProcessHandle;
use crate::procfs::{self, ProcessInfo};
use crate::registers::{Register, RegisterState};
use crate::thread::{ThreadHandle, ThreadState};
use crate::types::{CpuExtension, CpuMode, MeansOfCapture, VirtAddr};

use launch::LaunchRequest;
use wait::{PendingEvents, PendingStatus};

/// Bytes of the main image read for header parsing.
const IMAGE_HEADER_BYTES: u64 = 4096;

const ATTACH_OPTIONS: ptrace::Options = ptrace::Options::PTRACE_O_TRACECLONE
    .union(ptrace::Options::PTRACE_O_TRACEEXEC)
    .union(ptrace::Options::PTRACE_O_TRACESYSGOOD);

/// The Linux debugging engine.
pub struct DebuggerCore {
    config: DebuggerConfig,
    pid: Option<Pid>,
    process: Option<ProcessHandle>,
    threads: HashMap<Pid, ThreadHandle>,
    active: Option<Pid>,
    pending: PendingEvents,
    /// New threads whose initial stop arrived before their parent's clone
    /// event.
    early_clone_stops: HashSet<Pid>,
    cpu_mode: CpuMode,
    means: MeansOfCapture,
    binary_info: Option<Box<dyn BinaryImage>>,
    page_size: u64,
}

impl Default for DebuggerCore {
    fn default() -> Self {
        Self::new(DebuggerConfig::default())
    }
}

impl std::fmt::Debug for DebuggerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerCore")
            .field("pid", &self.pid)
            .field("threads", &self.threads.len())
            .field("active", &self.active)
            .field("pending", &self.pending.len())
            .field("cpu_mode", &self.cpu_mode)
            .field("means", &self.means)
            .finish()
    }
}

impl DebuggerCore {
    pub fn new(config: DebuggerConfig) -> Self {
        let page_size = match unistd::sysconf(SysconfVar::PAGE_SIZE) {
            Ok(Some(size)) if size > 0 => size as u64,
            _ => 4096,
        };
        Self {
            config,
            pid: None,
            process: None,
            threads: HashMap::new(),
            active: None,
            pending: PendingEvents::default(),
            early_clone_stops: HashSet::new(),
            cpu_mode: CpuMode::Unknown,
            means: MeansOfCapture::NeverCaptured,
            binary_info: None,
            page_size,
        }
    }

    pub fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    /// Pid of the debuggee, when a session is active.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Thread that produced the most recent event.
    pub fn active_thread(&self) -> Option<Pid> {
        self.active
    }

    pub fn thread(&self, tid: Pid) -> Option<&ThreadHandle> {
        self.threads.get(&tid)
    }

    /// Traced threads, ordered by tid.
    pub fn threads(&self) -> Vec<&ThreadHandle> {
        let mut threads: Vec<_> = self.threads.values().collect();
        threads.sort_by_key(|t| t.tid());
        threads
    }

    /// Parsed main image of the debuggee.
    pub fn binary_info(&self) -> Option<&dyn BinaryImage> {
        self.binary_info.as_deref()
    }

    pub fn pointer_size(&self) -> usize {
        self.cpu_mode.pointer_size()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn parent_pid(&self, pid: Pid) -> TdbResult<Option<Pid>> {
        procfs::parent_pid(pid)
    }

    pub fn instruction_pointer(&self) -> &'static str {
        if self.cpu_mode == CpuMode::X86_32 { "eip" } else { "rip" }
    }

    pub fn stack_pointer(&self) -> &'static str {
        if self.cpu_mode == CpuMode::X86_32 { "esp" } else { "rsp" }
    }

    pub fn frame_pointer(&self) -> &'static str {
        if self.cpu_mode == CpuMode::X86_32 { "ebp" } else { "rbp" }
    }

    pub fn flag_register(&self) -> &'static str {
        if self.cpu_mode == CpuMode::X86_32 { "eflags" } else { "rflags" }
    }

    /// Hex address zero-padded to the debuggee's pointer width.
    pub fn format_pointer(&self, addr: VirtAddr) -> String {
        format!("{:0width$x}", addr.addr(), width = self.pointer_size() * 2)
    }

    /// Continue one stopped thread, optionally delivering `signal`.
    pub fn continue_thread(&mut self, tid: Pid, signal: Option<Signal>) -> TdbResult<()> {
        self.stopped_thread(tid)?;
        ptrace::cont(tid, signal)?;
        self.mark_running(tid);
        Ok(())
    }

    /// Single-step one stopped thread, optionally delivering `signal`.
    pub fn step_thread(&mut self, tid: Pid, signal: Option<Signal>) -> TdbResult<()> {
        self.stopped_thread(tid)?;
        ptrace::step(tid, signal)?;
        self.mark_running(tid);
        Ok(())
    }

    fn stopped_thread(&self, tid: Pid) -> TdbResult<&ThreadHandle> {
        let thread = self.threads.get(&tid).ok_or(TdbError::UnknownThread(tid))?;
        if thread.is_stopped() {
            Ok(thread)
        } else {
            Err(TdbError::SysCall(Errno::ESRCH))
        }
    }

    fn mark_running(&mut self, tid: Pid) {
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.mark_running();
        }
    }

    fn any_running(&self) -> bool {
        self.threads.values().any(ThreadHandle::is_running)
    }

    /// Attach one thread and consume its attach stop. `Ok(false)` when the
    /// thread vanished first.
    fn attach_thread(&mut self, pid: Pid, tid: Pid) -> TdbResult<bool> {
        match ptrace::attach(tid) {
            Ok(()) => {}
            Err(Errno::ESRCH) if tid != pid => return Ok(false),
            Err(Errno::ESRCH) => return Err(TdbError::NoSuchProcess(pid)),
            Err(Errno::EPERM) => {
                return Err(match procfs::tracer_pid(pid) {
                    Ok(Some(tracer)) => TdbError::AlreadyTraced { pid, tracer },
                    _ => TdbError::PermissionDenied(pid),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let status = wait::wait_thread(tid)?;
        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            log::debug!("thread {tid} exited while attaching");
            if tid == pid {
                return Err(TdbError::NoSuchProcess(pid));
            }
            return Ok(false);
        }
        ptrace::setoptions(tid, ATTACH_OPTIONS)?;

        let mut thread = ThreadHandle::new(tid, ThreadState::Stopped);
        if wait::is_sigstop(status) {
            thread.mark_stopped(status, None);
        } else {
            // Something else got in first; our SIGSTOP is still on its way.
            log::debug!("thread {tid} stopped with status {status:#x} before attach stop");
            let signal = stop_signal(status).filter(|sig| *sig != Signal::SIGTRAP);
            thread.mark_stopped(status, signal);
            thread.set_expecting_stop(true);
        }
        self.threads.insert(tid, thread);
        Ok(true)
    }

    /// Open the memory handle, detect the CPU mode and parse the main image.
    /// Called with every thread stopped.
    fn refresh_process(&mut self, pid: Pid) {
        self.process = Some(ProcessHandle::new(pid, self.config.memory_strategy));
        self.cpu_mode = self.detect_cpu_mode();
        self.binary_info = match self.read_binary_info() {
            Ok(info) => info,
            Err(e) => {
                log::debug!("no binary info for {pid}: {e}");
                None
            }
        };
        log::debug!("process {pid}: cpu mode {}", self.cpu_mode);
    }

    fn detect_cpu_mode(&mut self) -> CpuMode {
        let Some(tid) = self.active.or(self.pid) else {
            return CpuMode::Unknown;
        };
        match self.get_state(tid) {
            Ok(regs) => cpu_mode_from_cs(regs.register(Register::Cs)),
            Err(e) => {
                log::debug!("cannot read registers of {tid} for cpu mode: {e}");
                CpuMode::Unknown
            }
        }
    }

    fn read_binary_info(&self) -> TdbResult<Option<Box<dyn BinaryImage>>> {
        let process = self.process.as_ref().ok_or(TdbError::NotAttached)?;
        let exe = process.executable()?;
        let maps = process.regions()?;
        let Some(region) = procfs::find_image_region(&maps, &exe.to_string_lossy()) else {
            return Ok(None);
        };
        let len = region.size().min(IMAGE_HEADER_BYTES) as usize;
        let data = process.read_vec(region.start, len)?;
        Ok(binary::create_binary_info(region, &data))
    }

    /// Stop every running thread that has nothing queued. Statuses other
    /// than our own `SIGSTOP` are queued in arrival order.
    fn stop_threads(&mut self) -> ThreadFailures {
        let mut failures = ThreadFailures::new();
        let Some(pid) = self.pid else {
            return failures;
        };

        let mut signalled = Vec::new();
        for thread in self.threads.values_mut() {
            if !thread.is_running() || self.pending.holds(thread.tid()) {
                continue;
            }
            let tid = thread.tid();
            match wait::tgkill(pid, tid, Signal::SIGSTOP) {
                Ok(()) => {
                    thread.set_expecting_stop(true);
                    signalled.push(tid);
                }
                Err(e) => failures.record(tid, e),
            }
        }

        for tid in signalled {
            let status = match wait::wait_thread(tid) {
                Ok(status) => status,
                Err(e) => {
                    failures.record(tid, e);
                    continue;
                }
            };
            let Some(thread) = self.threads.get_mut(&tid) else {
                continue;
            };
            if wait::is_sigstop(status) {
                thread.set_expecting_stop(false);
                thread.mark_stopped(status, None);
            } else {
                log::debug!("queued status {status:#x} of thread {tid}");
                thread.mark_stopped(status, None);
                self.pending.push(tid, status);
            }
        }
        failures
    }

    /// Turn one reported status into an event, updating the thread map.
    /// `None` for statuses that are bookkeeping only.
    fn handle_status(
        &mut self,
        tid: Pid,
        status: i32,
        preset: Option<EventReason>,
    ) -> TdbResult<Option<DebugEvent>> {
        let Some(thread) = self.threads.get_mut(&tid) else {
            if wait::is_sigstop(status) {
                log::debug!("early stop of new thread {tid}");
                self.early_clone_stops.insert(tid);
            } else {
                log::debug!("ignoring status {status:#x} of untracked thread {tid}");
            }
            return Ok(None);
        };

        if preset.is_none() && thread.expecting_stop() && wait::is_sigstop(status) {
            let was_running = thread.is_running();
            thread.set_expecting_stop(false);
            thread.mark_stopped(status, None);
            if was_running {
                ptrace::cont(tid, None)?;
                thread.mark_running();
            }
            return Ok(None);
        }

        let reason = match preset {
            Some(reason) => reason,
            None => {
                let decoded = WaitStatus::from_raw(tid, status)?;
                match event::classify(decoded, |t| Ok(ptrace::getevent(t)?))? {
                    Some(reason) => reason,
                    None => return Ok(None),
                }
            }
        };

        let mut signal_info = None;
        match reason {
            EventReason::Exited(_) | EventReason::Terminated(_) => {
                thread.mark_exited(status);
                self.threads.remove(&tid);
                self.pending.discard(tid);
                log::info!("thread {tid} ended: {reason:?}");
                if self.pid == Some(tid) || self.threads.is_empty() {
                    log::info!("process {tid} is gone");
                    self.reset_session();
                } else {
                    let failures = self.stop_threads();
                    if !failures.is_empty() {
                        log::warn!("could not stop every thread: {failures}");
                    }
                    self.active = self.successor_thread();
                }
                return Ok(Some(DebugEvent::new(tid, status, reason)));
            }
            EventReason::Stopped(sig) => {
                let signal = (sig != Signal::SIGTRAP).then_some(sig);
                thread.mark_stopped(status, signal);
                if stop_signal(status).is_some() {
                    signal_info = read_signal_info(tid);
                }
            }
            EventReason::Cloned(child) => {
                thread.mark_stopped(status, None);
                self.adopt_clone(child)?;
            }
            EventReason::ExecTransition => {
                thread.mark_stopped(status, None);
                if preset.is_none() {
                    self.handle_exec(tid);
                }
            }
            EventReason::SyscallBoundary => thread.mark_stopped(status, None),
        }

        self.active = Some(tid);
        let failures = self.stop_threads();
        if !failures.is_empty() {
            log::warn!("could not stop every thread: {failures}");
        }
        if preset.is_none() && reason == EventReason::ExecTransition {
            if let Some(pid) = self.pid {
                self.refresh_process(pid);
            }
        }
        Ok(Some(DebugEvent::new(tid, status, reason).with_signal_info(signal_info)))
    }

    /// Thread that takes over as active when the active one exits: the
    /// leader, else the lowest tid, among stopped threads with nothing
    /// queued. `None` leaves the choice to the next queued status.
    fn successor_thread(&self) -> Option<Pid> {
        let resumable = |t: &&ThreadHandle| t.is_stopped() && !self.pending.holds(t.tid());
        let leader = self.pid.and_then(|pid| self.threads.get(&pid)).filter(resumable);
        leader
            .or_else(|| self.threads.values().filter(resumable).min_by_key(|t| t.tid()))
            .map(ThreadHandle::tid)
    }

    fn adopt_clone(&mut self, child: Pid) -> TdbResult<()> {
        let status = if self.early_clone_stops.remove(&child) {
            None
        } else {
            Some(wait::wait_thread(child)?)
        };
        let mut thread = ThreadHandle::new(child, ThreadState::Stopped);
        if let Some(status) = status {
            thread.mark_stopped(status, None);
        }
        self.threads.insert(child, thread);
        log::info!("new thread {child}");
        Ok(())
    }

    /// After `execve` only the thread group leader survives.
    fn handle_exec(&mut self, tid: Pid) {
        let Some(pid) = self.pid else {
            return;
        };
        if tid != pid {
            log::debug!("exec reported by {tid}, expected {pid}");
        }
        let gone: Vec<Pid> = self.threads.keys().copied().filter(|t| *t != pid).collect();
        for t in gone {
            self.threads.remove(&t);
            self.pending.discard(t);
        }
        self.cpu_mode = CpuMode::Unknown;
        self.binary_info = None;
        log::info!("process {pid} executed a new image");
    }

    fn reset_session(&mut self) {
        self.pid = None;
        self.process = None;
        self.threads.clear();
        self.active = None;
        self.pending.clear();
        self.early_clone_stops.clear();
        self.cpu_mode = CpuMode::Unknown;
        self.binary_info = None;
    }

    /// Signals to hand back on detach, from statuses still queued.
    fn queued_signals(&mut self) -> HashMap<Pid, Signal> {
        let mut signals = HashMap::new();
        while let Some(PendingStatus { tid, status, .. }) = self.pending.pop() {
            if let Some(sig) = stop_signal(status).filter(|sig| *sig != Signal::SIGTRAP) {
                signals.entry(tid).or_insert(sig);
            }
        }
        signals
    }

    fn detach_previous(&mut self) {
        match self.detach() {
            Ok(failures) if !failures.is_empty() => {
                log::warn!("detaching previous session: {failures}")
            }
            Ok(_) => {}
            Err(e) => log::warn!("detaching previous session: {e}"),
        }
    }

    /// Release or kill the current session, whichever matches how it began.
    fn end_session(&mut self) {
        if self.pid.is_none() {
            return;
        }
        let failures = match self.means {
            MeansOfCapture::Launched => self.kill(),
            _ => match self.detach() {
                Ok(failures) => failures,
                Err(e) => {
                    log::warn!("detach failed: {e}");
                    return;
                }
            },
        };
        if !failures.is_empty() {
            log::warn!("ending session: {failures}");
        }
    }
}

impl Debugger for DebuggerCore {
    type Process = ProcessHandle;

    fn attach(&mut self, pid: Pid) -> TdbResult<()> {
        self.detach_previous();

        if !procfs::process_exists(pid) {
            return Err(TdbError::NoSuchProcess(pid));
        }
        if let Some(tracer) = procfs::tracer_pid(pid)? {
            return Err(TdbError::AlreadyTraced { pid, tracer });
        }

        self.pid = Some(pid);
        let attached = (|| -> TdbResult<()> {
            loop {
                let mut added = false;
                for tid in procfs::thread_ids(pid)? {
                    if self.threads.contains_key(&tid) {
                        continue;
                    }
                    added |= self.attach_thread(pid, tid)?;
                }
                if !added {
                    return Ok(());
                }
            }
        })();

        if let Err(e) = attached {
            for tid in self.threads.keys() {
                if let Err(e) = ptrace::detach(*tid, None) {
                    log::debug!("rollback detach of {tid} failed: {e}");
                }
            }
            self.reset_session();
            return Err(e);
        }

        self.means = MeansOfCapture::Attached;
        self.active = Some(pid);
        self.refresh_process(pid);
        log::info!("attached to {pid} ({} threads)", self.threads.len());
        Ok(())
    }

    fn open(
        &mut self,
        path: &Path,
        cwd: Option<&Path>,
        args: &[String],
        tty: Option<&Path>,
    ) -> TdbResult<()> {
        self.detach_previous();

        let (pid, status) = launch::spawn(&LaunchRequest {
            path,
            cwd,
            args,
            tty,
            disable_aslr: self.config.disable_aslr,
        })?;

        let mut thread = ThreadHandle::new(pid, ThreadState::Stopped);
        thread.mark_stopped(status, None);
        self.threads.insert(pid, thread);
        self.pid = Some(pid);
        self.means = MeansOfCapture::Launched;
        self.refresh_process(pid);

        self.pending.push_status(PendingStatus {
            tid: pid,
            status,
            reason: Some(EventReason::ExecTransition),
        });
        self.active = None;
        Ok(())
    }

    fn detach(&mut self) -> TdbResult<ThreadFailures> {
        let Some(pid) = self.pid else {
            return Ok(ThreadFailures::new());
        };

        let mut failures = self.stop_threads();
        let expecting = self.threads.values().any(ThreadHandle::expecting_stop);
        let queued = self.queued_signals();

        for thread in self.threads.values_mut() {
            let tid = thread.tid();
            let signal = queued.get(&tid).copied().or(thread.pending_signal());
            if let Err(e) = ptrace::detach(tid, signal) {
                failures.record(tid, e.into());
            }
            thread.mark_detached();
        }

        if expecting {
            // A SIGSTOP we sent is still pending and would freeze the process.
            if let Err(e) = signal::kill(pid, Signal::SIGCONT) {
                failures.record(pid, e.into());
            }
        }

        self.reset_session();
        log::info!("detached from {pid}");
        Ok(failures)
    }

    fn kill(&mut self) -> ThreadFailures {
        let mut failures = ThreadFailures::new();
        let Some(pid) = self.pid else {
            return failures;
        };

        if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
            failures.record(pid, e.into());
        }

        // The leader's exit is only reported once the other threads are reaped.
        let mut tids: Vec<Pid> = self.threads.keys().copied().filter(|t| *t != pid).collect();
        tids.push(pid);
        for tid in tids {
            loop {
                match wait::wait_thread(tid) {
                    Ok(status) if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) => break,
                    Ok(_) => continue,
                    Err(TdbError::SysCall(Errno::ECHILD)) => break,
                    Err(e) => {
                        failures.record(tid, e);
                        break;
                    }
                }
            }
        }

        self.reset_session();
        log::info!("killed {pid}");
        failures
    }

    fn wait_debug_event(&mut self, timeout: Option<Duration>) -> TdbResult<Option<DebugEvent>> {
        loop {
            let active_stopped = self
                .active
                .and_then(|tid| self.threads.get(&tid))
                .is_some_and(ThreadHandle::is_stopped);
            if !active_stopped {
                if let Some(queued) = self.pending.pop() {
                    match self.handle_status(queued.tid, queued.status, queued.reason)? {
                        Some(event) => return Ok(Some(event)),
                        None => continue,
                    }
                }
            }
            break;
        }

        if self.threads.is_empty() && self.pending.is_empty() {
            return Err(TdbError::NotAttached);
        }
        if !self.any_running() {
            return Ok(None);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let (tid, status) = match deadline {
                None => wait::wait_any()?,
                Some(deadline) => match wait::poll_any()? {
                    Some(reported) => reported,
                    None => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Ok(None);
                        }
                        std::thread::sleep(self.config.poll_interval.min(deadline - now));
                        continue;
                    }
                },
            };

            if let Some(event) = self.handle_status(tid, status, None)? {
                log::debug!("{event}");
                return Ok(Some(event));
            }
            if !self.any_running() {
                return Ok(None);
            }
        }
    }

    fn get_state(&mut self, tid: Pid) -> TdbResult<RegisterState> {
        let thread = self.threads.get_mut(&tid).ok_or(TdbError::UnknownThread(tid))?;
        if !thread.is_stopped() {
            return thread
                .cached_registers()
                .copied()
                .ok_or(TdbError::SysCall(Errno::ESRCH));
        }
        if let Some(regs) = thread.fresh_registers() {
            return Ok(*regs);
        }
        let regs = RegisterState::from(ptrace::getregs(tid)?);
        thread.cache_registers(regs);
        Ok(regs)
    }

    fn set_state(&mut self, tid: Pid, state: &RegisterState) -> TdbResult<()> {
        self.stopped_thread(tid)?;
        ptrace::setregs(tid, libc::user_regs_struct::from(state))?;
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.cache_registers(*state);
        }
        Ok(())
    }

    fn resume(&mut self, disposition: SignalDisposition) -> TdbResult<()> {
        if self.pid.is_none() {
            return Err(TdbError::NotAttached);
        }

        if let Some(active) = self.active.filter(|tid| !self.pending.holds(*tid)) {
            if self.threads.get(&active).is_some_and(ThreadHandle::is_stopped) {
                let signal = self.delivered_signal(active, disposition);
                self.continue_thread(active, signal)?;
            }
        }

        let others: Vec<Pid> = self
            .threads
            .values()
            .filter(|t| t.is_stopped() && !self.pending.holds(t.tid()))
            .map(ThreadHandle::tid)
            .collect();
        for tid in others {
            if let Err(e) = self.continue_thread(tid, None) {
                log::warn!("cannot resume thread {tid}: {e}");
            }
        }
        Ok(())
    }

    fn step(&mut self, disposition: SignalDisposition) -> TdbResult<()> {
        let Some(active) = self.active else {
            // A live session without an active thread still has queued
            // statuses to hand out.
            return Err(match self.pid {
                Some(_) => TdbError::SysCall(Errno::ESRCH),
                None => TdbError::NotAttached,
            });
        };
        let signal = self.delivered_signal(active, disposition);
        self.step_thread(active, signal)
    }

    fn cpu_mode(&self) -> CpuMode {
        self.cpu_mode
    }

    fn has_extension(&self, extension: CpuExtension) -> bool {
        match extension {
            CpuExtension::Mmx => std::arch::is_x86_feature_detected!("mmx"),
            CpuExtension::Sse => std::arch::is_x86_feature_detected!("sse"),
            CpuExtension::Sse2 => std::arch::is_x86_feature_detected!("sse2"),
            CpuExtension::Sse3 => std::arch::is_x86_feature_detected!("sse3"),
            CpuExtension::Ssse3 => std::arch::is_x86_feature_detected!("ssse3"),
            CpuExtension::Sse41 => std::arch::is_x86_feature_detected!("sse4.1"),
            CpuExtension::Sse42 => std::arch::is_x86_feature_detected!("sse4.2"),
            CpuExtension::Avx => std::arch::is_x86_feature_detected!("avx"),
            CpuExtension::Avx2 => std::arch::is_x86_feature_detected!("avx2"),
            CpuExtension::Avx512f => std::arch::is_x86_feature_detected!("avx512f"),
        }
    }

    fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    fn enumerate_processes(&self) -> TdbResult<BTreeMap<Pid, ProcessInfo>> {
        procfs::enumerate_processes()
    }

    fn last_means_of_capture(&self) -> MeansOfCapture {
        self.means
    }
}

impl DebuggerCore {
    fn delivered_signal(&self, tid: Pid, disposition: SignalDisposition) -> Option<Signal> {
        match disposition {
            SignalDisposition::Suppress => None,
            SignalDisposition::Deliver => self.threads.get(&tid).and_then(ThreadHandle::pending_signal),
        }
    }
}

impl Drop for DebuggerCore {
    fn drop(&mut self) {
        self.end_session();
    }
}

/// Execution width implied by the `cs` selector of a Linux x86-64 thread.
fn cpu_mode_from_cs(cs: u64) -> CpuMode {
    match cs {
        0x23 => CpuMode::X86_32,
        0x33 => CpuMode::X86_64,
        _ => CpuMode::Unknown,
    }
}

/// Kernel details of the signal a thread is stopped on. `None` when the
/// stop has no siginfo (group-stops report `EINVAL`).
fn read_signal_info(tid: Pid) -> Option<SignalInfo> {
    match ptrace::getsiginfo(tid) {
        Ok(info) => Some(SignalInfo::from(&info)),
        Err(e) => {
            log::debug!("no siginfo for thread {tid}: {e}");
            None
        }
    }
}

/// Signal of a plain signal-delivery stop.
fn stop_signal(status: i32) -> Option<Signal> {
    if libc::WIFSTOPPED(status) && (status >> 16) == 0 {
        Signal::try_from(libc::WSTOPSIG(status)).ok()
    } else {
        None
    }
}
