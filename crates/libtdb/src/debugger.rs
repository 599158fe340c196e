//! Upward interface of the debugging engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use nix::unistd::Pid;

use crate::errors::{TdbResult, ThreadFailures};
use crate::event::DebugEvent;
use crate::memory::MemoryAccess;
use crate::procfs::ProcessInfo;
use crate::registers::RegisterState;
use crate::types::{CpuExtension, CpuMode, CpuType, MeansOfCapture};

/// What to do with the signal that stopped the active thread when it is
/// resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalDisposition {
    /// Discard it.
    #[default]
    Suppress,
    /// Hand it to the thread.
    Deliver,
}

/// Control and inspection of one debuggee at a time.
///
/// All-stop semantics: whenever [`wait_debug_event`](Self::wait_debug_event)
/// returns an event, every traced thread is stopped.
pub trait Debugger {
    type Process: MemoryAccess;

    /// Attach to every thread of a running process.
    fn attach(&mut self, pid: Pid) -> TdbResult<()>;

    /// Launch `path` under trace. The first event is the exec transition of
    /// the new process.
    fn open(
        &mut self,
        path: &Path,
        cwd: Option<&Path>,
        args: &[String],
        tty: Option<&Path>,
    ) -> TdbResult<()>;

    /// Release every thread and forget the session. Calling it without a
    /// session is a no-op.
    fn detach(&mut self) -> TdbResult<ThreadFailures>;

    /// Kill the debuggee and reap its threads.
    fn kill(&mut self) -> ThreadFailures;

    /// Block for the next event. `None` timeout waits forever; `Ok(None)`
    /// means the deadline passed or nothing can report.
    fn wait_debug_event(&mut self, timeout: Option<Duration>) -> TdbResult<Option<DebugEvent>>;

    fn get_state(&mut self, tid: Pid) -> TdbResult<RegisterState>;

    fn set_state(&mut self, tid: Pid, state: &RegisterState) -> TdbResult<()>;

    /// Continue every stopped thread.
    fn resume(&mut self, disposition: SignalDisposition) -> TdbResult<()>;

    /// Single-step the active thread.
    fn step(&mut self, disposition: SignalDisposition) -> TdbResult<()>;

    fn cpu_mode(&self) -> CpuMode;

    /// Architecture of the debuggee, derived from its current mode.
    fn cpu_type(&self) -> CpuType {
        CpuType::from(self.cpu_mode())
    }

    /// Whether the processor running the debuggee supports `extension`.
    fn has_extension(&self, extension: CpuExtension) -> bool;

    fn process(&self) -> Option<&Self::Process>;

    fn enumerate_processes(&self) -> TdbResult<BTreeMap<Pid, ProcessInfo>>;

    fn last_means_of_capture(&self) -> MeansOfCapture;
}
