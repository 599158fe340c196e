//! Platform backends. Exactly one is compiled in and exported as
//! [`NativeDebugger`].

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub type NativeDebugger = linux::DebuggerCore;
