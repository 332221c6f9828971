//! CLI entry point for the `legv8` micro-stepping emulator.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use legv8_core::{
    Instruction, InstructionTable, Machine, MachineConfig, MachineExport, StepOutcome,
    GENERAL_REGISTER_COUNT, INSTRUCTION_BYTES,
};
#[cfg(test)]
use tempfile as _;
use tracing_subscriber::EnvFilter;

const USAGE_TEXT: &str = "\
Usage: legv8 <command> <program> [options]

Commands:
  run    <program>   Run the program to completion and print the final state
  trace  <program>   Like run, printing every micro-step as it is applied
  disasm <program>   Print the address, word and disassembly of each instruction

Options:
  --json               Print the final machine export as JSON
  --memory <bytes>     Data memory capacity (default 4096)
  --history <n>        Snapshots kept for stepping back (default 10000)
  --max-steps <n>      Stop after this many micro-steps (default 1000000)
  --strict             Fault on unassigned branch conditions
  --table <file>       Load instruction definitions from a file
  --set Xn=value       Preset a register before running (repeatable)
  -v, --verbose        Log engine events to stderr
  -h, --help           Show this help message

Examples:
  legv8 run sum.s --set X1=10
  legv8 trace sum.s --json
  legv8 disasm sum.s
";

const DEFAULT_MAX_STEPS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Trace,
    Disasm,
}

#[derive(Debug, PartialEq, Eq)]
struct Options {
    mode: Mode,
    program: PathBuf,
    json: bool,
    config: MachineConfig,
    max_steps: usize,
    table: Option<PathBuf>,
    presets: Vec<(usize, i64)>,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Command(Options),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let mode = match first.to_string_lossy().as_ref() {
        "run" => Mode::Run,
        "trace" => Mode::Trace,
        "disasm" => Mode::Disasm,
        other => return Err(format!("unknown command: {other}")),
    };
    parse_options(mode, args).map(|options| options.map_or(ParseResult::Help, ParseResult::Command))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_options(
    mode: Mode,
    mut args: impl Iterator<Item = OsString>,
) -> Result<Option<Options>, String> {
    let mut program: Option<PathBuf> = None;
    let mut json = false;
    let mut config = MachineConfig::default();
    let mut max_steps = DEFAULT_MAX_STEPS;
    let mut table = None;
    let mut presets = Vec::new();
    let mut verbose = false;

    while let Some(arg) = args.next() {
        let flag = arg.to_string_lossy().to_string();
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "-v" | "--verbose" => verbose = true,
            "--json" => json = true,
            "--strict" => config.strict_conditions = true,
            "--memory" => config.memory_bytes = parse_number(&flag, args.next())?,
            "--history" => config.history_capacity = parse_number(&flag, args.next())?,
            "--max-steps" => max_steps = parse_number(&flag, args.next())?,
            "--table" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --table".to_string())?;
                table = Some(PathBuf::from(value));
            }
            "--set" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --set".to_string())?;
                presets.push(parse_preset(&value.to_string_lossy())?);
            }
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            _ => {
                if program.is_some() {
                    return Err("multiple program paths provided".to_string());
                }
                program = Some(PathBuf::from(arg));
            }
        }
    }

    let program = program.ok_or_else(|| "missing program path".to_string())?;
    Ok(Some(Options {
        mode,
        program,
        json,
        config,
        max_steps,
        table,
        presets,
        verbose,
    }))
}

fn parse_number(flag: &str, value: Option<OsString>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("missing value for {flag}"))?;
    let text = value.to_string_lossy();
    text.parse()
        .map_err(|_| format!("invalid value for {flag}: {text}"))
}

fn parse_preset(text: &str) -> Result<(usize, i64), String> {
    let invalid = || format!("invalid register preset: {text} (expected Xn=value)");
    let (register, value) = text.split_once('=').ok_or_else(invalid)?;
    let index = register
        .trim()
        .strip_prefix(['X', 'x'])
        .and_then(|number| number.parse::<usize>().ok())
        .filter(|&index| index < GENERAL_REGISTER_COUNT)
        .ok_or_else(invalid)?;
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .map_or_else(|| value.parse(), |hex| i64::from_str_radix(hex, 16))
        .map_err(|_| invalid())?;
    Ok((index, value))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_lines(path: &Path) -> Result<Vec<String>, String> {
    fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .map_err(|e| format!("failed to read {}: {e}", path.display()))
}

fn build_machine(options: &Options) -> Result<Machine, String> {
    let table = match &options.table {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            InstructionTable::parse(&text)
        }
        None => InstructionTable::builtin(),
    };
    let mut machine = Machine::with_table(options.config, Arc::new(table));
    let lines = read_lines(&options.program)?;
    machine
        .load_program(&lines)
        .map_err(|e| format!("{}:{e}", options.program.display()))?;
    for &(index, value) in &options.presets {
        machine
            .set_register(index, value)
            .map_err(|e| e.to_string())?;
    }
    tracing::debug!(
        program = %options.program.display(),
        instructions = machine.program().len(),
        presets = options.presets.len(),
        "machine ready"
    );
    Ok(machine)
}

fn run(options: &Options) -> Result<(), String> {
    let mut machine = build_machine(options)?;

    if options.mode == Mode::Disasm {
        print_listing(machine.program());
        return Ok(());
    }

    let mut applied = 0;
    let mut failure = None;
    while applied < options.max_steps {
        let pc = machine.pc();
        match machine.step() {
            Ok(StepOutcome::Finished) => break,
            Ok(StepOutcome::Stepped { label, stage, .. }) => {
                applied += 1;
                if options.mode == Mode::Trace {
                    println!("{pc:#06x} {:<6} {label}", stage.name());
                }
            }
            Err(fault) => {
                failure = Some(format!("fault at {pc:#x}: {fault}"));
                break;
            }
        }
    }

    let export = machine.export();
    if options.json {
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| format!("failed to serialize state: {e}"))?;
        println!("{json}");
    } else {
        print_summary(&export, applied);
    }

    if let Some(failure) = failure {
        return Err(failure);
    }
    if !machine.is_finished() {
        return Err(format!(
            "step limit of {} reached before the program finished",
            options.max_steps
        ));
    }
    Ok(())
}

fn print_listing(program: &[Instruction]) {
    let mut address = 0u64;
    for instruction in program {
        println!("{address:#06x}: {:08x}  {instruction}", instruction.word());
        address += INSTRUCTION_BYTES;
    }
}

fn print_summary(export: &MachineExport, steps: usize) {
    println!(
        "{steps} micro-steps, pc={:#x}, flags={}, finished={}",
        export.pc, export.flags, export.finished
    );
    if let Some(last) = &export.last_instruction {
        println!("last: {last}");
    }
    for (index, value) in export.registers.iter().enumerate() {
        if *value != 0 {
            println!("X{index:<2} = {value} ({value:#x})");
        }
    }
    for (address, value) in &export.memory {
        println!("[{address:#06x}] = {value}");
    }
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(options)) => {
            init_logging(options.verbose);
            match run(&options) {
                Ok(()) => 0,
                Err(error) => {
                    eprintln!("error: {error}");
                    1
                }
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
