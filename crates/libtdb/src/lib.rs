//! Core library for the tdb debugger.
//! ptrace-driven process control, debug events, register state and ELF
//! image queries, consumed by the CLI front end.

pub mod binary;
pub mod config;
pub mod debugger;
pub mod errors;
pub mod event;
pub mod memory;
pub mod platform;
#[cfg(target_os = "linux")]
pub mod process;
pub mod procfs;
pub mod registers;
pub mod thread;
pub mod types;

pub use binary::{BinaryImage, create_binary_info};
pub use config::{DebuggerConfig, MemoryStrategy};
pub use debugger::{Debugger, SignalDisposition};
pub use errors::{TdbError, TdbResult, ThreadFailures};
pub use event::{DebugEvent, EventReason, SignalInfo};
pub use memory::MemoryAccess;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use platform::NativeDebugger;
pub use registers::RegisterState;
pub use thread::{ThreadHandle, ThreadState};
pub use types::{CpuExtension, CpuMode, CpuType, MeansOfCapture, VirtAddr};

/// Exposes the crate version for CLI reporting.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
