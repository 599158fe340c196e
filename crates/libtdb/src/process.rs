//! Handle on a traced process and its memory.
//!
//! Memory goes through `/proc/<pid>/mem` when the attach-time probe finds it
//! working, and through word-sized `PTRACE_PEEKDATA` / `PTRACE_POKEDATA`
//! otherwise.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::config::MemoryStrategy;
use crate::errors::{TdbError, TdbResult};
use crate::memory::MemoryAccess;
use crate::procfs::{self, Region};
use crate::types::VirtAddr;

const WORD_SIZE: usize = std::mem::size_of::<libc::c_long>();

/// Which direct-memory paths turned out unusable for this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCapabilities {
    pub read_broken: bool,
    pub write_broken: bool,
}

impl MemoryCapabilities {
    /// Capabilities forced by an explicit strategy, `None` for `Auto`.
    pub fn from_strategy(strategy: MemoryStrategy) -> Option<Self> {
        match strategy {
            MemoryStrategy::Auto => None,
            MemoryStrategy::ProcMem => Some(Self::default()),
            MemoryStrategy::Ptrace => Some(Self {
                read_broken: true,
                write_broken: true,
            }),
        }
    }

    /// Check `/proc/<pid>/mem` against ptrace on the first readable mapping.
    ///
    /// The tracee must be ptrace-stopped. A read that fails or disagrees with
    /// `PTRACE_PEEKDATA` marks both paths broken; otherwise the word is
    /// written back unchanged to test the write path.
    fn probe(pid: Pid, mem: Option<&File>) -> Self {
        let broken = Self {
            read_broken: true,
            write_broken: true,
        };
        let Some(mem) = mem else {
            return broken;
        };
        let target = match procfs::read_memory_maps(pid) {
            Ok(maps) => match maps.into_iter().find(probe_candidate) {
                Some(region) => region.start,
                None => return broken,
            },
            Err(e) => {
                log::debug!("cannot read maps of {pid} for memory probe: {e}");
                return broken;
            }
        };

        let mut direct = [0u8; WORD_SIZE];
        let read_ok = matches!(mem.read_at(&mut direct, target.addr()), Ok(n) if n == WORD_SIZE);
        let peeked = peek(pid, target).ok();
        if !read_ok || peeked != Some(libc::c_long::from_ne_bytes(direct)) {
            return broken;
        }

        let write_ok = matches!(mem.write_at(&direct, target.addr()), Ok(n) if n == WORD_SIZE);
        Self {
            read_broken: false,
            write_broken: !write_ok,
        }
    }
}

/// A process under trace.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    mem: Option<File>,
    capabilities: MemoryCapabilities,
}

impl ProcessHandle {
    /// Open the memory file and settle the transfer paths. Called once per
    /// attach, open or exec while the process is stopped.
    pub(crate) fn new(pid: Pid, strategy: MemoryStrategy) -> Self {
        let mem = open_mem(pid);
        let capabilities = match MemoryCapabilities::from_strategy(strategy) {
            Some(forced) => forced,
            None => MemoryCapabilities::probe(pid, mem.as_ref()),
        };
        if capabilities.read_broken || capabilities.write_broken {
            log::warn!(
                "process {pid}: /proc/{pid}/mem unusable (read broken: {}, write broken: {}), using ptrace",
                capabilities.read_broken,
                capabilities.write_broken
            );
        }
        Self {
            pid,
            mem,
            capabilities,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn capabilities(&self) -> MemoryCapabilities {
        self.capabilities
    }

    pub fn regions(&self) -> TdbResult<Vec<Region>> {
        procfs::read_memory_maps(self.pid)
    }

    pub fn executable(&self) -> TdbResult<PathBuf> {
        procfs::exe_path(self.pid)
    }

    pub fn name(&self) -> TdbResult<String> {
        Ok(procfs::process_info(self.pid)?.name)
    }

    pub fn parent_pid(&self) -> TdbResult<Option<Pid>> {
        procfs::parent_pid(self.pid)
    }

    pub fn task_ids(&self) -> TdbResult<Vec<Pid>> {
        procfs::thread_ids(self.pid)
    }

    fn direct(&self, broken: bool) -> Option<&File> {
        if broken { None } else { self.mem.as_ref() }
    }

    fn read_direct(&self, mem: &File, addr: VirtAddr, buf: &mut [u8]) -> TdbResult<()> {
        let mut done = 0;
        while done < buf.len() {
            match mem.read_at(&mut buf[done..], addr.addr() + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("read of {} bytes at {addr} stopped at {done}: {e}", buf.len());
                    break;
                }
            }
        }
        check_transfer(addr, done, buf.len())
    }

    fn write_direct(&self, mem: &File, addr: VirtAddr, data: &[u8]) -> TdbResult<()> {
        let mut done = 0;
        while done < data.len() {
            match mem.write_at(&data[done..], addr.addr() + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("write of {} bytes at {addr} stopped at {done}: {e}", data.len());
                    break;
                }
            }
        }
        check_transfer(addr, done, data.len())
    }

    fn read_ptrace(&self, addr: VirtAddr, buf: &mut [u8]) -> TdbResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cursor = addr + done as u64;
            let misalign = (cursor.addr() % WORD_SIZE as u64) as usize;
            let word_addr = cursor - misalign as u64;
            let word = match peek(self.pid, word_addr) {
                Ok(word) => word.to_ne_bytes(),
                Err(e) => {
                    log::debug!("peek at {word_addr} failed: {e}");
                    break;
                }
            };
            let take = (WORD_SIZE - misalign).min(buf.len() - done);
            buf[done..done + take].copy_from_slice(&word[misalign..misalign + take]);
            done += take;
        }
        check_transfer(addr, done, buf.len())
    }

    fn write_ptrace(&self, addr: VirtAddr, data: &[u8]) -> TdbResult<()> {
        let mut done = 0;
        while done < data.len() {
            let cursor = addr + done as u64;
            let misalign = (cursor.addr() % WORD_SIZE as u64) as usize;
            let word_addr = cursor - misalign as u64;
            let take = (WORD_SIZE - misalign).min(data.len() - done);
            let chunk = &data[done..done + take];

            let word = if take == WORD_SIZE {
                let mut bytes = [0u8; WORD_SIZE];
                bytes.copy_from_slice(chunk);
                libc::c_long::from_ne_bytes(bytes)
            } else {
                match peek(self.pid, word_addr) {
                    Ok(original) => splice_word(original, misalign, chunk),
                    Err(e) => {
                        log::debug!("peek before partial poke at {word_addr} failed: {e}");
                        break;
                    }
                }
            };
            if let Err(e) = ptrace::write(self.pid, word_addr.addr() as ptrace::AddressType, word) {
                log::debug!("poke at {word_addr} failed: {e}");
                break;
            }
            done += take;
        }
        check_transfer(addr, done, data.len())
    }
}

impl MemoryAccess for ProcessHandle {
    fn read_bytes(&self, addr: VirtAddr, buf: &mut [u8]) -> TdbResult<()> {
        match self.direct(self.capabilities.read_broken) {
            Some(mem) => self.read_direct(mem, addr, buf),
            None => self.read_ptrace(addr, buf),
        }
    }

    fn write_bytes(&self, addr: VirtAddr, data: &[u8]) -> TdbResult<()> {
        match self.direct(self.capabilities.write_broken) {
            Some(mem) => self.write_direct(mem, addr, data),
            None => self.write_ptrace(addr, data),
        }
    }
}

/// Readable, word-sized, and not a kernel-provided page (`[vvar]` and
/// `[vsyscall]` refuse ptrace access).
fn probe_candidate(region: &Region) -> bool {
    region.perms.read
        && region.size() >= WORD_SIZE as u64
        && !region.pathname.starts_with("[vvar")
        && region.pathname != "[vsyscall]"
}

fn open_mem(pid: Pid) -> Option<File> {
    let path = format!("/proc/{pid}/mem");
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .or_else(|_| File::open(&path))
        .map_err(|e| log::debug!("cannot open {path}: {e}"))
        .ok()
}

fn peek(pid: Pid, addr: VirtAddr) -> TdbResult<libc::c_long> {
    Ok(ptrace::read(pid, addr.addr() as ptrace::AddressType)?)
}

fn check_transfer(address: VirtAddr, transferred: usize, requested: usize) -> TdbResult<()> {
    if transferred == requested {
        Ok(())
    } else {
        Err(TdbError::MemoryAccessFault {
            address,
            transferred,
            requested,
        })
    }
}

/// Overlay `data` onto `word` starting at byte `offset`, in memory order.
pub(crate) fn splice_word(word: libc::c_long, offset: usize, data: &[u8]) -> libc::c_long {
    let mut bytes = word.to_ne_bytes();
    let end = (offset + data.len()).min(WORD_SIZE);
    bytes[offset..end].copy_from_slice(&data[..end - offset]);
    libc::c_long::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: [u8; WORD_SIZE]) -> libc::c_long {
        libc::c_long::from_ne_bytes(bytes)
    }

    #[test]
    fn splice_replaces_only_covered_bytes() {
        let original = word([0x11; WORD_SIZE]);
        let spliced = splice_word(original, 2, &[0xaa, 0xbb]);
        let bytes = spliced.to_ne_bytes();
        assert_eq!(&bytes[..2], &[0x11, 0x11]);
        assert_eq!(&bytes[2..4], &[0xaa, 0xbb]);
        assert!(bytes[4..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn splice_clips_at_word_end() {
        let spliced = splice_word(0, WORD_SIZE - 1, &[0xcc, 0xdd, 0xee]);
        let bytes = spliced.to_ne_bytes();
        assert_eq!(bytes[WORD_SIZE - 1], 0xcc);
        assert!(bytes[..WORD_SIZE - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn forced_strategies_skip_probe() {
        assert_eq!(MemoryCapabilities::from_strategy(MemoryStrategy::Auto), None);
        assert_eq!(
            MemoryCapabilities::from_strategy(MemoryStrategy::ProcMem),
            Some(MemoryCapabilities::default())
        );
        let ptrace_only = MemoryCapabilities::from_strategy(MemoryStrategy::Ptrace).unwrap();
        assert!(ptrace_only.read_broken && ptrace_only.write_broken);
    }

    #[test]
    fn short_transfer_reports_progress() {
        let err = check_transfer(VirtAddr(0x1000), 3, 8).unwrap_err();
        assert!(matches!(
            err,
            TdbError::MemoryAccessFault {
                address: VirtAddr(0x1000),
                transferred: 3,
                requested: 8
            }
        ));
        assert!(check_transfer(VirtAddr(0x1000), 8, 8).is_ok());
    }

    #[test]
    fn probe_skips_kernel_pages() {
        let maps = procfs::parse_maps(
            "7ffd5e3f2000-7ffd5e3f6000 r--p 00000000 00:00 0  [vvar]\n\
             7ffd5e3f6000-7ffd5e3f8000 r-xp 00000000 00:00 0  [vdso]\n",
        );
        let picked = maps.iter().find(|r| probe_candidate(r)).map(|r| r.pathname.as_str());
        assert_eq!(picked, Some("[vdso]"));
    }

    #[test]
    fn missing_mem_file_forces_ptrace() {
        let caps = MemoryCapabilities::probe(Pid::this(), None);
        assert!(caps.read_broken && caps.write_broken);
    }
}
