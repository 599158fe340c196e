//! Small value types shared across the engine.

use std::fmt;

/// Virtual address in the traced process (post-ASLR).
///
/// For position-independent images this differs from the addresses recorded
/// in the image's own headers by the load bias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub const NULL: VirtAddr = VirtAddr(0);

    pub fn addr(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset the address by a signed displacement, wrapping on overflow.
    pub fn offset(self, delta: i64) -> VirtAddr {
        VirtAddr(self.0.wrapping_add_signed(delta))
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for VirtAddr {
    fn from(addr: u64) -> Self {
        VirtAddr(addr)
    }
}

impl std::ops::Add<u64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: u64) -> Self::Output {
        VirtAddr(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u64> for VirtAddr {
    type Output = VirtAddr;
    fn sub(self, rhs: u64) -> Self::Output {
        VirtAddr(self.0.wrapping_sub(rhs))
    }
}

/// Execution width of the traced thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CpuMode {
    #[default]
    Unknown,
    X86_32,
    X86_64,
}

impl CpuMode {
    /// Pointer width in bytes, falling back to the debugger's own width.
    pub fn pointer_size(self) -> usize {
        match self {
            CpuMode::X86_32 => 4,
            CpuMode::X86_64 => 8,
            CpuMode::Unknown => std::mem::size_of::<usize>(),
        }
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CpuMode::Unknown => "unknown",
            CpuMode::X86_32 => "x86",
            CpuMode::X86_64 => "x86-64",
        };
        f.write_str(name)
    }
}

/// Processor architecture the debuggee executes as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CpuType {
    #[default]
    Unknown,
    X86,
    X86_64,
}

impl CpuType {
    /// ELF `e_machine` value for the architecture.
    pub fn elf_machine(self) -> Option<u16> {
        match self {
            CpuType::Unknown => None,
            CpuType::X86 => Some(object::elf::EM_386),
            CpuType::X86_64 => Some(object::elf::EM_X86_64),
        }
    }
}

impl From<CpuMode> for CpuType {
    fn from(mode: CpuMode) -> Self {
        match mode {
            CpuMode::Unknown => CpuType::Unknown,
            CpuMode::X86_32 => CpuType::X86,
            CpuMode::X86_64 => CpuType::X86_64,
        }
    }
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CpuType::Unknown => "unknown",
            CpuType::X86 => "i386",
            CpuType::X86_64 => "x86_64",
        };
        f.write_str(name)
    }
}

/// Instruction-set extensions that can be queried on the host CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuExtension {
    Mmx,
    Sse,
    Sse2,
    Sse3,
    Ssse3,
    Sse41,
    Sse42,
    Avx,
    Avx2,
    Avx512f,
}

/// How the current (or most recent) debuggee came under control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeansOfCapture {
    #[default]
    NeverCaptured,
    Attached,
    Launched,
}
