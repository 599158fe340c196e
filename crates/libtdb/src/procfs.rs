//! Linux procfs queries: host process listing, thread listing, memory maps
//! and `/proc/<pid>/status` fields.
//!
//! Parsing is kept separate from file access so it can be tested against
//! captured text.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use nix::unistd::Pid;

use crate::errors::{TdbError, TdbResult};
use crate::types::VirtAddr;

/// A single mapping from `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub perms: Permissions,
    pub offset: u64,
    pub pathname: String,
}

impl Region {
    pub fn size(&self) -> u64 {
        self.end.addr().saturating_sub(self.start.addr())
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Mapping permissions (rwxp/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub private: bool,
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
            if self.private { 'p' } else { 's' },
        )
    }
}

/// Fields of `/proc/<pid>/status` the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: String,
    /// Single-letter scheduler state (`R`, `S`, `t`, `Z`, ...).
    pub state: char,
    pub uid: u32,
    /// Pid of the process tracing this one, `None` when untraced.
    pub tracer: Option<Pid>,
    pub threads: usize,
}

/// Map an I/O failure on `/proc/<pid>/...` to the engine's taxonomy.
fn proc_error(pid: Pid, err: io::Error) -> TdbError {
    match err.kind() {
        io::ErrorKind::NotFound => TdbError::NoSuchProcess(pid),
        io::ErrorKind::PermissionDenied => TdbError::PermissionDenied(pid),
        _ => TdbError::Io(err),
    }
}

/// Whether `/proc/<pid>` currently exists.
pub fn process_exists(pid: Pid) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

/// Parse `/proc/<pid>/maps` into a list of regions.
pub fn read_memory_maps(pid: Pid) -> TdbResult<Vec<Region>> {
    let content =
        std::fs::read_to_string(format!("/proc/{pid}/maps")).map_err(|e| proc_error(pid, e))?;
    Ok(parse_maps(&content))
}

/// Parse the contents of a maps file.
pub fn parse_maps(content: &str) -> Vec<Region> {
    content.lines().filter_map(parse_map_line).collect()
}

fn parse_map_line(line: &str) -> Option<Region> {
    // 7f8a1000-7f8a2000 r-xp 00000000 08:01 12345  /lib/libc.so.6
    let mut parts = line.splitn(6, char::is_whitespace);

    let addr_range = parts.next()?;
    let perms_str = parts.next()?;
    let offset_str = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let pathname = parts.next().unwrap_or("").trim().to_string();

    let (start_str, end_str) = addr_range.split_once('-')?;
    let perms = perms_str.as_bytes();
    if perms.len() < 4 {
        return None;
    }

    Some(Region {
        start: VirtAddr(u64::from_str_radix(start_str, 16).ok()?),
        end: VirtAddr(u64::from_str_radix(end_str, 16).ok()?),
        perms: Permissions {
            read: perms[0] == b'r',
            write: perms[1] == b'w',
            execute: perms[2] == b'x',
            private: perms[3] == b'p',
        },
        offset: u64::from_str_radix(offset_str, 16).ok()?,
        pathname,
    })
}

/// Find which region contains a given address.
pub fn find_region_containing(maps: &[Region], addr: VirtAddr) -> Option<&Region> {
    maps.iter().find(|r| r.contains(addr))
}

/// The mapping that holds the start of `path`'s image (file offset zero).
pub fn find_image_region<'a>(maps: &'a [Region], path: &str) -> Option<&'a Region> {
    maps.iter().find(|r| r.offset == 0 && r.pathname == path)
}

/// Executable path of a process via `/proc/<pid>/exe`.
pub fn exe_path(pid: Pid) -> TdbResult<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe")).map_err(|e| proc_error(pid, e))
}

/// Thread ids listed under `/proc/<pid>/task`, sorted ascending.
pub fn thread_ids(pid: Pid) -> TdbResult<Vec<Pid>> {
    let entries = std::fs::read_dir(format!("/proc/{pid}/task")).map_err(|e| proc_error(pid, e))?;
    let mut tids: Vec<Pid> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .map(Pid::from_raw)
        .collect();
    tids.sort();
    Ok(tids)
}

/// Read and parse `/proc/<pid>/status`.
pub fn process_info(pid: Pid) -> TdbResult<ProcessInfo> {
    let content =
        std::fs::read_to_string(format!("/proc/{pid}/status")).map_err(|e| proc_error(pid, e))?;
    parse_status(pid, &content).ok_or_else(|| {
        TdbError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unparsable /proc/{pid}/status"),
        ))
    })
}

/// Parse the contents of a status file.
pub fn parse_status(pid: Pid, content: &str) -> Option<ProcessInfo> {
    let mut name = None;
    let mut state = '?';
    let mut parent = None;
    let mut uid = 0;
    let mut tracer = None;
    let mut threads = 1;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => name = Some(value.to_string()),
            "State" => state = value.chars().next().unwrap_or('?'),
            "PPid" => {
                parent = value
                    .parse::<i32>()
                    .ok()
                    .filter(|&p| p != 0)
                    .map(Pid::from_raw)
            }
            // Real, effective, saved, filesystem.
            "Uid" => uid = value.split_whitespace().next()?.parse().ok()?,
            "TracerPid" => {
                tracer = value
                    .parse::<i32>()
                    .ok()
                    .filter(|&p| p != 0)
                    .map(Pid::from_raw)
            }
            "Threads" => threads = value.parse().unwrap_or(1),
            _ => {}
        }
    }

    Some(ProcessInfo {
        pid,
        parent,
        name: name?,
        state,
        uid,
        tracer,
        threads,
    })
}

/// Pid of the tracer attached to `pid`, if any.
pub fn tracer_pid(pid: Pid) -> TdbResult<Option<Pid>> {
    Ok(process_info(pid)?.tracer)
}

/// Parent of `pid`, if it has one.
pub fn parent_pid(pid: Pid) -> TdbResult<Option<Pid>> {
    Ok(process_info(pid)?.parent)
}

/// Every process visible on the host. Processes that vanish or deny access
/// while being listed are skipped.
pub fn enumerate_processes() -> TdbResult<BTreeMap<Pid, ProcessInfo>> {
    let mut processes = BTreeMap::new();
    for entry in std::fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
            .map(Pid::from_raw)
        else {
            continue;
        };
        match process_info(pid) {
            Ok(info) => {
                processes.insert(pid, info);
            }
            Err(err) => log::debug!("skipping pid {pid}: {err}"),
        }
    }
    Ok(processes)
}
