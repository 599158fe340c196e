//! x86-64 register snapshot.
//!
//! `RegisterState` is a plain value: a fixed buffer indexed by [`Register`]
//! with name-based accessors. Editing one never touches the tracee; the core's
//! `set_state` pushes it back with `PTRACE_SETREGS`.

use crate::errors::{TdbError, TdbResult};

/// Register type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    GeneralPurpose,
    InstructionPointer,
    Flags,
    Segment,
    SegmentBase,
}

/// Every register carried by a snapshot, in buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Cs,
    Ss,
    Ds,
    Es,
    Fs,
    Gs,
    FsBase,
    GsBase,
    OrigRax,
}

pub const REGISTER_COUNT: usize = 27;

impl Register {
    fn index(self) -> usize {
        self as usize
    }
}

/// Metadata for a single register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterInfo {
    pub name: &'static str,
    pub register: Register,
    pub kind: RegisterKind,
}

const fn info(name: &'static str, register: Register, kind: RegisterKind) -> RegisterInfo {
    RegisterInfo {
        name,
        register,
        kind,
    }
}

/// The register table, in display order.
pub static REGISTERS: [RegisterInfo; REGISTER_COUNT] = {
    use Register::*;
    use RegisterKind::*;
    [
        info("rax", Rax, GeneralPurpose),
        info("rbx", Rbx, GeneralPurpose),
        info("rcx", Rcx, GeneralPurpose),
        info("rdx", Rdx, GeneralPurpose),
        info("rsi", Rsi, GeneralPurpose),
        info("rdi", Rdi, GeneralPurpose),
        info("rbp", Rbp, GeneralPurpose),
        info("rsp", Rsp, GeneralPurpose),
        info("r8", R8, GeneralPurpose),
        info("r9", R9, GeneralPurpose),
        info("r10", R10, GeneralPurpose),
        info("r11", R11, GeneralPurpose),
        info("r12", R12, GeneralPurpose),
        info("r13", R13, GeneralPurpose),
        info("r14", R14, GeneralPurpose),
        info("r15", R15, GeneralPurpose),
        info("rip", Rip, InstructionPointer),
        info("rflags", Rflags, Flags),
        info("cs", Cs, Segment),
        info("ss", Ss, Segment),
        info("ds", Ds, Segment),
        info("es", Es, Segment),
        info("fs", Fs, Segment),
        info("gs", Gs, Segment),
        info("fs_base", FsBase, SegmentBase),
        info("gs_base", GsBase, SegmentBase),
        info("orig_rax", OrigRax, GeneralPurpose),
    ]
};

/// 32-bit names that alias the low half of a 64-bit register.
static ALIASES_32: [(&str, Register); 10] = [
    ("eax", Register::Rax),
    ("ebx", Register::Rbx),
    ("ecx", Register::Rcx),
    ("edx", Register::Rdx),
    ("esi", Register::Rsi),
    ("edi", Register::Rdi),
    ("ebp", Register::Rbp),
    ("esp", Register::Rsp),
    ("eip", Register::Rip),
    ("eflags", Register::Rflags),
];

/// Resolve a register name to its slot and whether it is a 32-bit alias.
fn lookup(name: &str) -> Option<(Register, bool)> {
    let name = name.to_ascii_lowercase();
    if let Some(info) = REGISTERS.iter().find(|info| info.name == name) {
        return Some((info.register, false));
    }
    ALIASES_32
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, reg)| (*reg, true))
}

/// Point-in-time copy of a thread's registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterState {
    values: [u64; REGISTER_COUNT],
}

impl RegisterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reg: Register) -> u64 {
        self.values[reg.index()]
    }

    pub fn set_register(&mut self, reg: Register, value: u64) {
        self.values[reg.index()] = value;
    }

    /// Get a register value by name. 32-bit aliases (`eax`, `eip`, ...) read
    /// the low half.
    pub fn get(&self, name: &str) -> TdbResult<u64> {
        match lookup(name) {
            Some((reg, false)) => Ok(self.register(reg)),
            Some((reg, true)) => Ok(self.register(reg) & 0xffff_ffff),
            None => Err(TdbError::UnknownRegister(name.to_string())),
        }
    }

    /// Set a register value by name. Writing a 32-bit alias zero-extends,
    /// as the hardware does.
    pub fn set(&mut self, name: &str, value: u64) -> TdbResult<()> {
        match lookup(name) {
            Some((reg, false)) => self.set_register(reg, value),
            Some((reg, true)) => self.set_register(reg, value & 0xffff_ffff),
            None => return Err(TdbError::UnknownRegister(name.to_string())),
        }
        Ok(())
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.register(Register::Rip)
    }

    pub fn set_instruction_pointer(&mut self, addr: u64) {
        self.set_register(Register::Rip, addr);
    }

    pub fn stack_pointer(&self) -> u64 {
        self.register(Register::Rsp)
    }

    pub fn set_stack_pointer(&mut self, addr: u64) {
        self.set_register(Register::Rsp, addr);
    }

    pub fn frame_pointer(&self) -> u64 {
        self.register(Register::Rbp)
    }

    pub fn flags(&self) -> u64 {
        self.register(Register::Rflags)
    }

    pub fn set_flags(&mut self, flags: u64) {
        self.set_register(Register::Rflags, flags);
    }

    /// All name/value pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        REGISTERS
            .iter()
            .map(move |info| (info.name, self.register(info.register)))
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod native {
    use super::{Register::*, RegisterState};

    impl From<libc::user_regs_struct> for RegisterState {
        fn from(regs: libc::user_regs_struct) -> Self {
            let mut state = RegisterState::new();
            for (reg, value) in [
                (Rax, regs.rax),
                (Rbx, regs.rbx),
                (Rcx, regs.rcx),
                (Rdx, regs.rdx),
                (Rsi, regs.rsi),
                (Rdi, regs.rdi),
                (Rbp, regs.rbp),
                (Rsp, regs.rsp),
                (R8, regs.r8),
                (R9, regs.r9),
                (R10, regs.r10),
                (R11, regs.r11),
                (R12, regs.r12),
                (R13, regs.r13),
                (R14, regs.r14),
                (R15, regs.r15),
                (Rip, regs.rip),
                (Rflags, regs.eflags),
                (Cs, regs.cs),
                (Ss, regs.ss),
                (Ds, regs.ds),
                (Es, regs.es),
                (Fs, regs.fs),
                (Gs, regs.gs),
                (FsBase, regs.fs_base),
                (GsBase, regs.gs_base),
                (OrigRax, regs.orig_rax),
            ] {
                state.set_register(reg, value);
            }
            state
        }
    }

    impl From<&RegisterState> for libc::user_regs_struct {
        fn from(state: &RegisterState) -> Self {
            libc::user_regs_struct {
                r15: state.register(R15),
                r14: state.register(R14),
                r13: state.register(R13),
                r12: state.register(R12),
                rbp: state.register(Rbp),
                rbx: state.register(Rbx),
                r11: state.register(R11),
                r10: state.register(R10),
                r9: state.register(R9),
                r8: state.register(R8),
                rax: state.register(Rax),
                rcx: state.register(Rcx),
                rdx: state.register(Rdx),
                rsi: state.register(Rsi),
                rdi: state.register(Rdi),
                orig_rax: state.register(OrigRax),
                rip: state.register(Rip),
                cs: state.register(Cs),
                eflags: state.register(Rflags),
                rsp: state.register(Rsp),
                ss: state.register(Ss),
                fs_base: state.register(FsBase),
                gs_base: state.register(GsBase),
                ds: state.register(Ds),
                es: state.register(Es),
                fs: state.register(Fs),
                gs: state.register(Gs),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_buffer_layout() {
        for (i, info) in REGISTERS.iter().enumerate() {
            assert_eq!(info.register.index(), i, "{} out of order", info.name);
        }
    }

    #[test]
    fn get_and_set_by_name() {
        let mut state = RegisterState::new();
        state.set("rax", 0x1122_3344_5566_7788).unwrap();
        state.set("R15", 7).unwrap();
        assert_eq!(state.get("rax").unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(state.get("r15").unwrap(), 7);
        assert_eq!(state.register(Register::R15), 7);
    }

    #[test]
    fn aliases_read_low_half_and_zero_extend() {
        let mut state = RegisterState::new();
        state.set("rax", 0xffff_ffff_0000_0001).unwrap();
        assert_eq!(state.get("eax").unwrap(), 1);

        state.set("eax", 0x1_2345_6789).unwrap();
        assert_eq!(state.get("rax").unwrap(), 0x2345_6789);
    }

    #[test]
    fn unknown_register_is_an_error() {
        let mut state = RegisterState::new();
        assert!(matches!(state.get("xmm0"), Err(TdbError::UnknownRegister(name)) if name == "xmm0"));
        assert!(state.set("bogus", 1).is_err());
    }

    #[test]
    fn named_accessors() {
        let mut state = RegisterState::new();
        state.set_instruction_pointer(0x401000);
        state.set_stack_pointer(0x7ffe_0000);
        state.set("rbp", 0x7ffe_0010).unwrap();
        state.set_flags(0x246);
        assert_eq!(state.instruction_pointer(), 0x401000);
        assert_eq!(state.get("eip").unwrap(), 0x401000);
        assert_eq!(state.stack_pointer(), 0x7ffe_0000);
        assert_eq!(state.frame_pointer(), 0x7ffe_0010);
        assert_eq!(state.flags(), 0x246);
        assert_eq!(state.get("eflags").unwrap(), 0x246);
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let mut original = RegisterState::new();
        original.set("rcx", 1).unwrap();
        let mut copy = original;
        copy.set("rcx", 2).unwrap();
        assert_eq!(original.get("rcx").unwrap(), 1);
        assert_eq!(copy.get("rcx").unwrap(), 2);
    }

    #[test]
    fn iter_walks_the_table() {
        let mut state = RegisterState::new();
        state.set("gs_base", 9).unwrap();
        let pairs: Vec<_> = state.iter().collect();
        assert_eq!(pairs.len(), REGISTER_COUNT);
        assert_eq!(pairs[0].0, "rax");
        assert!(pairs.contains(&("gs_base", 9)));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn native_round_trip_preserves_every_slot() {
        let mut state = RegisterState::new();
        for (i, info) in REGISTERS.iter().enumerate() {
            state.set_register(info.register, 0x100 + i as u64);
        }
        let raw = libc::user_regs_struct::from(&state);
        assert_eq!(raw.eflags, state.flags());
        assert_eq!(RegisterState::from(raw), state);
    }
}
