//! Runtime configuration for a debugging session.

use std::time::Duration;

/// How tracee memory is transferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryStrategy {
    /// Probe `/proc/<pid>/mem` at attach time and fall back to ptrace
    /// peek/poke if it misbehaves.
    #[default]
    Auto,
    /// Always use `/proc/<pid>/mem`.
    ProcMem,
    /// Always use word-at-a-time `PTRACE_PEEKDATA` / `PTRACE_POKEDATA`.
    Ptrace,
}

/// Knobs consumed by the debugger core.
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// Launch new processes with `ADDR_NO_RANDOMIZE`.
    pub disable_aslr: bool,
    pub memory_strategy: MemoryStrategy,
    /// Sleep between non-blocking wait polls when a timeout is in effect.
    pub poll_interval: Duration,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            disable_aslr: false,
            memory_strategy: MemoryStrategy::Auto,
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl DebuggerConfig {
    pub fn with_disable_aslr(mut self, disable: bool) -> Self {
        self.disable_aslr = disable;
        self
    }

    pub fn with_memory_strategy(mut self, strategy: MemoryStrategy) -> Self {
        self.memory_strategy = strategy;
        self
    }

    /// Zero intervals are clamped to one millisecond.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }
}
