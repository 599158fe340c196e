//! Fork/exec of a new debuggee.
//!
//! The child reports setup failures through a close-on-exec pipe: a clean
//! exec closes the write end without data, anything else writes the failing
//! step and its errno before `_exit`. Everything the child touches is
//! prepared before `fork`, so the child only makes raw syscalls.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::unistd::{ForkResult, Pid, fork, pipe2};

use crate::errors::{TdbError, TdbResult};

use super::wait;

/// Exit code of a child that failed before exec.
const CHILD_SETUP_FAILED: libc::c_int = 127;

/// Step of child setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum ChildStep {
    TraceMe = 1,
    Personality = 2,
    ChangeDirectory = 3,
    OpenTerminal = 4,
    RedirectTerminal = 5,
    Exec = 6,
}

impl ChildStep {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::TraceMe,
            2 => Self::Personality,
            3 => Self::ChangeDirectory,
            4 => Self::OpenTerminal,
            5 => Self::RedirectTerminal,
            6 => Self::Exec,
            _ => return None,
        })
    }

    fn describe(self) -> &'static str {
        match self {
            Self::TraceMe => "PTRACE_TRACEME failed",
            Self::Personality => "cannot disable address space randomization",
            Self::ChangeDirectory => "cannot change working directory",
            Self::OpenTerminal => "cannot open terminal",
            Self::RedirectTerminal => "cannot redirect standard streams",
            Self::Exec => "exec failed",
        }
    }
}

/// Encode a child failure report: step code then errno, both native-endian.
fn encode_report(step: ChildStep, errno: i32) -> [u8; 8] {
    let mut report = [0u8; 8];
    report[..4].copy_from_slice(&(step as u32).to_ne_bytes());
    report[4..].copy_from_slice(&errno.to_ne_bytes());
    report
}

/// Decode whatever the child wrote; `None` when it exec'd cleanly.
fn decode_report(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    if bytes.len() < 8 {
        return Some("child exited during setup".to_string());
    }
    let mut code = [0u8; 4];
    let mut errno = [0u8; 4];
    code.copy_from_slice(&bytes[..4]);
    errno.copy_from_slice(&bytes[4..8]);
    let errno = Errno::from_raw(i32::from_ne_bytes(errno));
    Some(match ChildStep::from_code(u32::from_ne_bytes(code)) {
        Some(step) => format!("{}: {}", step.describe(), errno.desc()),
        None => format!("child setup failed: {}", errno.desc()),
    })
}

/// What to launch and how.
#[derive(Debug)]
pub(super) struct LaunchRequest<'a> {
    pub path: &'a Path,
    pub cwd: Option<&'a Path>,
    pub args: &'a [String],
    pub tty: Option<&'a Path>,
    pub disable_aslr: bool,
}

/// Spawn the debuggee stopped at its exec trap. Returns the new pid and the
/// raw status of that stop.
pub(super) fn spawn(request: &LaunchRequest<'_>) -> TdbResult<(Pid, i32)> {
    let display = request.path.display().to_string();
    let program = path_cstring(request.path)?;
    let mut argv = Vec::with_capacity(request.args.len() + 1);
    argv.push(program.clone());
    for arg in request.args {
        argv.push(CString::new(arg.as_str())?);
    }
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let cwd = request.cwd.map(path_cstring).transpose()?;
    let tty = request.tty.map(path_cstring).transpose()?;

    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)?;

    match unsafe { fork() }? {
        ForkResult::Child => {
            drop(read_end);
            child_setup(
                &write_end,
                &program,
                &argv_ptrs,
                cwd.as_deref(),
                tty.as_deref(),
                request.disable_aslr,
            )
        }
        ForkResult::Parent { child } => {
            drop(write_end);
            log::debug!("forked {child} for {display}");
            let mut report = Vec::new();
            File::from(read_end).read_to_end(&mut report)?;

            if let Some(reason) = decode_report(&report) {
                // The child is about to _exit; reap it so it does not linger.
                if let Err(e) = wait::wait_thread(child) {
                    log::debug!("cannot reap failed child {child}: {e}");
                }
                return Err(TdbError::SpawnFailure {
                    path: display,
                    reason,
                });
            }

            let status = wait::wait_thread(child)?;
            if !libc::WIFSTOPPED(status) {
                return Err(TdbError::SpawnFailure {
                    path: display,
                    reason: format!("process ended before its first instruction (status {status:#x})"),
                });
            }

            ptrace::setoptions(
                child,
                ptrace::Options::PTRACE_O_TRACECLONE
                    | ptrace::Options::PTRACE_O_TRACEEXEC
                    | ptrace::Options::PTRACE_O_TRACESYSGOOD
                    | ptrace::Options::PTRACE_O_EXITKILL,
            )?;
            log::info!("launched {display} as {child}");
            Ok((child, status))
        }
    }
}

fn path_cstring(path: &Path) -> TdbResult<CString> {
    Ok(CString::new(path.as_os_str().as_bytes())?)
}

/// Runs in the forked child. Never returns.
fn child_setup(
    report: &OwnedFd,
    program: &CStr,
    argv: &[*const libc::c_char],
    cwd: Option<&CStr>,
    tty: Option<&CStr>,
    disable_aslr: bool,
) -> ! {
    let fail = |step: ChildStep| -> ! {
        let bytes = encode_report(step, Errno::last_raw());
        unsafe {
            libc::write(report.as_raw_fd(), bytes.as_ptr().cast(), bytes.len());
            libc::_exit(CHILD_SETUP_FAILED)
        }
    };

    if ptrace::traceme().is_err() {
        fail(ChildStep::TraceMe);
    }

    if disable_aslr {
        let disabled = personality::get()
            .and_then(|current| personality::set(current | Persona::ADDR_NO_RANDOMIZE));
        if disabled.is_err() {
            fail(ChildStep::Personality);
        }
    }

    if let Some(dir) = cwd {
        if unsafe { libc::chdir(dir.as_ptr()) } == -1 {
            fail(ChildStep::ChangeDirectory);
        }
    }

    if let Some(tty) = tty {
        let fd = unsafe { libc::open(tty.as_ptr(), libc::O_RDWR | libc::O_NOCTTY) };
        if fd == -1 {
            fail(ChildStep::OpenTerminal);
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if unsafe { libc::dup2(fd, target) } == -1 {
                fail(ChildStep::RedirectTerminal);
            }
        }
        if fd > libc::STDERR_FILENO {
            unsafe { libc::close(fd) };
        }
    }

    unsafe { libc::execvp(program.as_ptr(), argv.as_ptr()) };
    fail(ChildStep::Exec)
}
