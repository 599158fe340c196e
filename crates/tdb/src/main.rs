//! Command-line interface for the tdb debugger.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use libtdb::procfs::{Permissions, Region};
use libtdb::{
    BinaryImage, CpuExtension, Debugger, DebuggerConfig, MemoryAccess, MemoryStrategy,
    NativeDebugger, SignalDisposition, VirtAddr, create_binary_info,
};
use log::info;
use nix::unistd::Pid;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// Top-level argument parser describing the debugger interface.
#[derive(Parser, Debug)]
#[command(name = "tdb", version, about = "A ptrace debugger for Linux", long_about = None)]
struct Cli {
    /// How tracee memory is read and written.
    #[arg(long, value_enum, default_value_t = MemoryArg::Auto, global = true)]
    memory: MemoryArg,
    /// Poll interval in milliseconds for timed waits.
    #[arg(long, default_value_t = 5, global = true)]
    poll_ms: u64,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MemoryArg {
    Auto,
    ProcMem,
    Ptrace,
}

impl From<MemoryArg> for MemoryStrategy {
    fn from(arg: MemoryArg) -> Self {
        match arg {
            MemoryArg::Auto => MemoryStrategy::Auto,
            MemoryArg::ProcMem => MemoryStrategy::ProcMem,
            MemoryArg::Ptrace => MemoryStrategy::Ptrace,
        }
    }
}

/// Subcommands exposed by the debugger frontend.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program under tdb control.
    Run {
        prog: PathBuf,
        #[arg(last = true)]
        args: Vec<String>,
        /// Working directory for the program.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Terminal to use for the program's standard streams.
        #[arg(long)]
        tty: Option<PathBuf>,
        /// Launch with address space randomization disabled.
        #[arg(long)]
        no_aslr: bool,
    },
    /// Attach to an existing process ID.
    Attach { pid: i32 },
    /// List processes on the host.
    Ps,
    /// Print the layout of an ELF file.
    Info { path: PathBuf },
    /// Display version information for diagnostics.
    Version,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = DebuggerConfig::default()
        .with_memory_strategy(cli.memory.into())
        .with_poll_interval(Duration::from_millis(cli.poll_ms));

    match cli.cmd {
        Command::Run {
            prog,
            args,
            cwd,
            tty,
            no_aslr,
        } => {
            info!("Launching {} with args {args:?}", prog.display());
            let mut debugger = NativeDebugger::new(config.with_disable_aslr(no_aslr));
            debugger
                .open(&prog, cwd.as_deref(), &args, tty.as_deref())
                .with_context(|| format!("failed to launch {}", prog.display()))?;
            report_next_event(&mut debugger, None)?;
            repl(&mut debugger)
        }
        Command::Attach { pid } => {
            info!("Attaching to pid {pid}");
            let mut debugger = NativeDebugger::new(config);
            debugger
                .attach(Pid::from_raw(pid))
                .with_context(|| format!("failed to attach to {pid}"))?;
            println!("attached to {pid}");
            repl(&mut debugger)
        }
        Command::Ps => list_processes(&NativeDebugger::new(config)),
        Command::Info { path } => describe_file(&path),
        Command::Version => {
            println!("tdb {}", libtdb::version());
            Ok(())
        }
    }
}

fn list_processes(debugger: &NativeDebugger) -> Result<()> {
    let processes = debugger.enumerate_processes()?;
    println!("{:>7} {:>7} {:>6} S  NAME", "PID", "PPID", "UID");
    for info in processes.values() {
        let parent = info.parent.map_or_else(|| "-".to_string(), |p| p.to_string());
        let traced = if info.tracer.is_some() { " (traced)" } else { "" };
        println!(
            "{:>7} {parent:>7} {:>6} {}  {}{traced}",
            info.pid, info.uid, info.state, info.name
        );
    }
    Ok(())
}

fn describe_file(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let region = Region {
        start: VirtAddr::NULL,
        end: VirtAddr(bytes.len() as u64),
        perms: Permissions {
            read: true,
            ..Permissions::default()
        },
        offset: 0,
        pathname: path.display().to_string(),
    };
    let image = create_binary_info(&region, &bytes)
        .ok_or_else(|| anyhow!("{} is not a recognised image", path.display()))?;
    print_image(image.as_ref());
    Ok(())
}

fn print_image(image: &dyn BinaryImage) {
    println!("format:       {}", image.format_name());
    println!("native:       {}", image.native());
    println!("entry point:  {}", image.entry_point());
    println!("base address: {}", image.base_address());
    println!("header size:  {}", image.header_size());
    for header in image.headers() {
        println!(
            "  {:<20} {:>18} {:#x}",
            header.kind.to_string(),
            header.address.to_string(),
            header.size
        );
    }
}

fn report_next_event(debugger: &mut NativeDebugger, timeout: Option<Duration>) -> Result<()> {
    match debugger.wait_debug_event(timeout)? {
        Some(event) => println!("{event}"),
        None => println!("no event"),
    }
    Ok(())
}

const CPU_EXTENSIONS: [CpuExtension; 10] = [
    CpuExtension::Mmx,
    CpuExtension::Sse,
    CpuExtension::Sse2,
    CpuExtension::Sse3,
    CpuExtension::Ssse3,
    CpuExtension::Sse41,
    CpuExtension::Sse42,
    CpuExtension::Avx,
    CpuExtension::Avx2,
    CpuExtension::Avx512f,
];

const HELP: &str = "\
commands:
  continue | c          resume all threads and wait for the next event
  step | s              single-step the active thread
  wait [ms]             wait for an event, optionally with a timeout
  regs                  print registers of the active thread
  set <reg> <value>     write one register of the active thread
  mem <addr> [len]      dump memory
  write <addr> <hex>    write bytes given as hex
  threads               list traced threads
  maps                  print memory regions
  cpu                   print cpu mode, type and extensions
  binary                describe the main image
  detach                release the process
  kill                  kill the process
  quit | q              leave tdb";

fn repl(debugger: &mut NativeDebugger) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("tdb> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let words: Vec<&str> = line.split_whitespace().collect();
        match run_command(debugger, &words) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

/// Execute one REPL command. Returns `true` to leave the loop.
fn run_command(debugger: &mut NativeDebugger, words: &[&str]) -> Result<bool> {
    match words {
        ["continue" | "c"] => {
            debugger.resume(SignalDisposition::Deliver)?;
            report_next_event(debugger, None)?;
        }
        ["step" | "s"] => {
            debugger.step(SignalDisposition::Deliver)?;
            report_next_event(debugger, None)?;
        }
        ["wait"] => report_next_event(debugger, None)?,
        ["wait", ms] => {
            let ms = parse_number(ms)?;
            report_next_event(debugger, Some(Duration::from_millis(ms)))?;
        }
        ["regs"] => {
            let tid = active(debugger)?;
            let regs = debugger.get_state(tid)?;
            for (name, value) in regs.iter() {
                println!("{name:>8} 0x{}", debugger.format_pointer(VirtAddr(value)));
            }
        }
        ["set", name, value] => {
            let tid = active(debugger)?;
            let mut regs = debugger.get_state(tid)?;
            regs.set(name, parse_number(value)?)?;
            debugger.set_state(tid, &regs)?;
        }
        ["mem", addr] => dump_memory(debugger, parse_number(addr)?, 64)?,
        ["mem", addr, len] => {
            let len = usize::try_from(parse_number(len)?)?;
            dump_memory(debugger, parse_number(addr)?, len)?
        }
        ["write", addr, hex] => {
            let bytes = parse_hex_bytes(hex)?;
            process(debugger)?.write_bytes(VirtAddr(parse_number(addr)?), &bytes)?;
        }
        ["threads"] => {
            let active = debugger.active_thread();
            for thread in debugger.threads() {
                let marker = if Some(thread.tid()) == active { '*' } else { ' ' };
                println!("{marker} {:>7} {}", thread.tid(), thread.state());
            }
        }
        ["maps"] => {
            for region in process(debugger)?.regions()? {
                println!(
                    "{}-{} {} {:08x} {}",
                    debugger.format_pointer(region.start),
                    debugger.format_pointer(region.end),
                    region.perms,
                    region.offset,
                    region.pathname
                );
            }
        }
        ["cpu"] => {
            println!("mode:       {}", debugger.cpu_mode());
            println!("type:       {}", debugger.cpu_type());
            let extensions: Vec<String> = CPU_EXTENSIONS
                .iter()
                .filter(|ext| debugger.has_extension(**ext))
                .map(|ext| format!("{ext:?}").to_lowercase())
                .collect();
            println!("extensions: {}", extensions.join(" "));
        }
        ["binary"] => {
            let image = debugger
                .binary_info()
                .ok_or_else(|| anyhow!("no main image recognised"))?;
            print_image(image);
            let memory = process(debugger)?;
            match image.debug_pointer(memory) {
                Some(addr) => println!("r_debug:      {addr}"),
                None => println!("r_debug:      not initialised"),
            }
            if let Some(main) = image.calculate_main(memory) {
                println!("main:         {main}");
            }
        }
        ["detach"] => {
            let failures = debugger.detach()?;
            if !failures.is_empty() {
                eprintln!("warning: {failures}");
            }
            return Ok(true);
        }
        ["kill"] => {
            let failures = debugger.kill();
            if !failures.is_empty() {
                eprintln!("warning: {failures}");
            }
            return Ok(true);
        }
        ["quit" | "q"] => return Ok(true),
        ["help" | "h"] => println!("{HELP}"),
        _ => bail!("unknown command (try `help`)"),
    }
    Ok(false)
}

fn active(debugger: &NativeDebugger) -> Result<Pid> {
    debugger
        .active_thread()
        .ok_or_else(|| anyhow!("no active thread"))
}

fn process(debugger: &NativeDebugger) -> Result<&libtdb::process::ProcessHandle> {
    debugger
        .process()
        .ok_or_else(|| anyhow!("no process is being debugged"))
}

fn dump_memory(debugger: &NativeDebugger, addr: u64, len: usize) -> Result<()> {
    let bytes = process(debugger)?.read_vec(VirtAddr(addr), len)?;
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        let at = VirtAddr(addr + (i * 16) as u64);
        println!("{}  {:<47}  {ascii}", debugger.format_pointer(at), hex.join(" "));
    }
    Ok(())
}

fn parse_number(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("invalid number: {text}"))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    if text.len() % 2 != 0 {
        bail!("hex string must have an even number of digits");
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .with_context(|| format!("invalid hex: {text}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x2a").unwrap(), 42);
        assert!(parse_number("zz").is_err());
    }

    #[test]
    fn hex_bytes() {
        assert_eq!(parse_hex_bytes("90cc").unwrap(), vec![0x90, 0xcc]);
        assert_eq!(parse_hex_bytes("0x01").unwrap(), vec![0x01]);
        assert!(parse_hex_bytes("abc").is_err());
        // Two-byte characters split across digit pairs.
        assert!(parse_hex_bytes("aéb").is_err());
        assert!(parse_hex_bytes("éé").is_err());
    }

    #[test]
    fn cli_parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "tdb", "--memory", "ptrace", "run", "--no-aslr", "/bin/ls", "--", "-l",
        ])
        .unwrap();
        assert!(matches!(cli.memory, MemoryArg::Ptrace));
        match cli.cmd {
            Command::Run {
                prog, args, no_aslr, ..
            } => {
                assert_eq!(prog, PathBuf::from("/bin/ls"));
                assert_eq!(args, vec!["-l".to_string()]);
                assert!(no_aslr);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
