//! sam3s-monitor - scriptable register monitor for the SAM3S peripheral models.
//!
//! Runs a script of one command per line against a fresh [`Machine`]:
//!
//! ```text
//! r ADDR          bus read
//! w ADDR VAL      bus write
//! dr ADDR         debug-path read
//! dw ADDR VAL     debug-path write
//! end-debug       leave the SPI debug session
//! tick N          deliver N ticks to the PMC and RTT
//! run CYCLES      advance host time through the scheduler
//! irq             list asserted interrupt lines
//! save PATH       write a snapshot
//! load PATH       restore a snapshot
//! # ...           comment
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hex. Set `RUST_LOG=guest_error=warn`
//! (or `debug`, `trace`) to see device diagnostics.

use sam3s_core::slaves::SpiFlash;
use sam3s_core::{Board, Machine, MachineConfig, TickSource};
use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process;

/// Flash attached by `--flash`: 1 MiB
const FLASH_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Read(u32),
    Write(u32, u32),
    DebugRead(u32),
    DebugWrite(u32, u32),
    EndDebug,
    Tick(u32),
    Run(u64),
    Irq,
    Save(PathBuf),
    Load(PathBuf),
}

fn parse_num(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|_| format!("bad number '{}'", s))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_num(s)?;
    u32::try_from(v).map_err(|_| format!("'{}' does not fit in 32 bits", s))
}

/// Chip select for `--flash`: NPCS0..3.
fn parse_cs(s: &str) -> Result<u8, String> {
    match parse_num(s) {
        Ok(v) if v < 4 => Ok(v as u8),
        _ => Err(format!("Invalid chip select '{}' (expected 0-3)", s)),
    }
}

/// Parse one script line. Blank lines and comments yield `None`.
fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let arg = |i: usize| words.get(i).copied().ok_or_else(|| format!("'{}' needs more arguments", words[0]));
    let expect_len = |n: usize| {
        if words.len() > n {
            Err(format!("'{}' takes {} argument(s)", words[0], n - 1))
        } else {
            Ok(())
        }
    };

    let cmd = match words[0] {
        "r" => {
            expect_len(2)?;
            Command::Read(parse_u32(arg(1)?)?)
        }
        "w" => {
            expect_len(3)?;
            Command::Write(parse_u32(arg(1)?)?, parse_u32(arg(2)?)?)
        }
        "dr" => {
            expect_len(2)?;
            Command::DebugRead(parse_u32(arg(1)?)?)
        }
        "dw" => {
            expect_len(3)?;
            Command::DebugWrite(parse_u32(arg(1)?)?, parse_u32(arg(2)?)?)
        }
        "end-debug" => {
            expect_len(1)?;
            Command::EndDebug
        }
        "tick" => {
            expect_len(2)?;
            Command::Tick(parse_u32(arg(1)?)?)
        }
        "run" => {
            expect_len(2)?;
            Command::Run(parse_num(arg(1)?)?)
        }
        "irq" => {
            expect_len(1)?;
            Command::Irq
        }
        "save" => {
            expect_len(2)?;
            Command::Save(PathBuf::from(arg(1)?))
        }
        "load" => {
            expect_len(2)?;
            Command::Load(PathBuf::from(arg(1)?))
        }
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(cmd))
}

/// Execute one command, returning the line to print.
fn execute(machine: &mut Machine, cmd: &Command) -> Result<String, String> {
    Ok(match cmd {
        Command::Read(addr) => format!("{:#010x} = {:#010x}", addr, machine.read(*addr)),
        Command::Write(addr, val) => {
            machine.write(*addr, *val);
            format!("{:#010x} <- {:#010x}", addr, val)
        }
        Command::DebugRead(addr) => {
            let val = machine.debug().read(*addr).map_err(|e| e.to_string())?;
            format!("{:#010x} = {:#010x} (debug)", addr, val)
        }
        Command::DebugWrite(addr, val) => {
            machine.debug().write(*addr, *val).map_err(|e| e.to_string())?;
            format!("{:#010x} <- {:#010x} (debug)", addr, val)
        }
        Command::EndDebug => {
            machine.debug().end_session();
            "debug session closed".to_string()
        }
        Command::Tick(n) => {
            for _ in 0..*n {
                machine.tick(TickSource::Pmc);
                machine.tick(TickSource::Rtt);
            }
            format!("{} tick(s)", n)
        }
        Command::Run(cycles) => {
            let fired = machine.advance(*cycles);
            format!("t={} ({} tick(s) delivered)", machine.now(), fired)
        }
        Command::Irq => {
            let irqs = machine.pending_irqs();
            if irqs.is_empty() {
                "irq: none".to_string()
            } else {
                let list: Vec<String> = irqs.iter().map(|n| n.to_string()).collect();
                format!("irq: {}", list.join(" "))
            }
        }
        Command::Save(path) => {
            machine.save_to_file(path).map_err(|e| e.to_string())?;
            format!("saved {}", path.display())
        }
        Command::Load(path) => {
            machine.load_from_file(path).map_err(|e| e.to_string())?;
            format!("loaded {}", path.display())
        }
    })
}

fn run_script(machine: &mut Machine, script: &str) -> Result<(), String> {
    for (i, line) in script.lines().enumerate() {
        let lineno = i + 1;
        let cmd = match parse_line(line).map_err(|e| format!("line {}: {}", lineno, e))? {
            Some(cmd) => cmd,
            None => continue,
        };
        match execute(machine, &cmd) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("line {}: {}", lineno, e),
        }
    }
    Ok(())
}

fn usage(prog: &str) {
    eprintln!("SAM3S peripheral monitor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Usage: {} <script|-> [options]", prog);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --board NAME         AT91SAM3S8 (default) or AT91SAM3SD8");
    eprintln!("  --flash CS           Attach a 1 MiB serial flash on chip select CS");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1].starts_with("--") {
        usage(&args[0]);
        process::exit(2);
    }
    let script_path = &args[1];

    let board = match args.iter().position(|a| a == "--board").and_then(|i| args.get(i + 1)) {
        Some(name) => match Board::from_name(name) {
            Some(b) => b,
            None => {
                eprintln!("Unknown board '{}'", name);
                process::exit(2);
            }
        },
        None => Board::default(),
    };
    let flash_cs: Option<u8> = match args.iter().position(|a| a == "--flash").and_then(|i| args.get(i + 1)) {
        Some(s) => match parse_cs(s) {
            Ok(cs) => Some(cs),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(2);
            }
        },
        None => None,
    };

    let mut machine = Machine::new(MachineConfig { board, ..MachineConfig::default() });
    if let Some(cs) = flash_cs {
        let flash = SpiFlash::new(format!("flash{}", cs), FLASH_SIZE);
        if let Err(e) = machine.attach_slave(Box::new(flash), cs) {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }

    let script = if script_path == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).map(|_| s)
    } else {
        std::fs::read_to_string(script_path)
    };
    let script = match script {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}: {}", script_path, e);
            process::exit(1);
        }
    };

    log::info!("running {} on {}", script_path, board.name());
    if let Err(e) = run_script(&mut machine, &script) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
