//! A small command-line front end for `corevm`: reads a source file, parses
//! it with the hand-rolled parser in [syntax], resolves and runs it.
//!
//! `corevm` itself has no notion of a terminal or a filesystem; this binary
//! exists purely to exercise it end to end, the same role the teacher
//! repo's own CLI played for its compiler.

use anyhow::{Context, Result};
use corevm::machine::Interpreter;
use corevm::resolver::Resolver;
use corevm_cli::syntax;
use std::fs;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "corevm", about = "Compile and run corevm programs")]
enum Command {
    /// Parse and resolve a program, reporting any errors, but don't run it.
    Check {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },
    /// Parse, resolve, and run a program.
    Run {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
        /// Size in bytes of the interpreter's stack segment.
        #[structopt(long, default_value = "65536")]
        stack_bytes: u32,
        /// Maximum number of evaluation steps before aborting as runaway.
        #[structopt(long, default_value = "10000000")]
        cycle_limit: u64,
    },
}

fn read_file(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Registers the handful of native calls a demo program can reach for:
/// `print(...)`, which accepts any number of scalar arguments and writes
/// them to stdout space-separated, mirroring the variadic marshalling
/// contract the interpreter uses for every ccall (spec.md §4.5).
fn register_builtin_ccalls(resolver: &mut Resolver) {
    resolver.register_ccall("print", Vec::new(), None, true, |frame| {
        // Each variadic entry is a 16-byte (8-byte type tag, 8-byte padded
        // value) pair; with no fixed arguments and no return value the
        // whole frame is the variadic tail, packed in reverse call order.
        let mut values = Vec::new();
        for chunk in frame.chunks_exact(16) {
            let tag = i64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let bytes: [u8; 8] = chunk[8..16].try_into().unwrap();
            let rendered = match tag {
                0 => i64::from_le_bytes(bytes).to_string(),
                1 => f64::from_le_bytes(bytes).to_string(),
                2 => (bytes[0] != 0).to_string(),
                3 => (bytes[0] as char).to_string(),
                4 => format!("0x{:x}", u64::from_le_bytes(bytes)),
                _ => format!("<{} bytes>", u64::from_le_bytes(bytes)),
            };
            values.push(rendered);
        }
        values.reverse();
        println!("{}", values.join(" "));
    });
}

fn run_check(path: &PathBuf) -> Result<()> {
    let source = read_file(path)?;
    let program = syntax::parse_program(&source)?;

    let mut resolver = Resolver::create();
    register_builtin_ccalls(&mut resolver);
    match resolver.resolve(&program, &source) {
        Ok(_) => {
            println!("{}: OK", path.display());
            Ok(())
        }
        Err(with_source) => {
            for err in with_source.errors() {
                eprintln!("{}", err);
            }
            anyhow::bail!("{} failed to resolve", path.display())
        }
    }
}

fn run_program(path: &PathBuf, stack_bytes: u32, cycle_limit: u64) -> Result<()> {
    let source = read_file(path)?;
    let program = syntax::parse_program(&source)?;

    let mut resolver = Resolver::create();
    register_builtin_ccalls(&mut resolver);
    let resolved = resolver.resolve(&program, &source).map_err(|with_source| {
        for err in with_source.errors() {
            eprintln!("{}", err);
        }
        anyhow::anyhow!("{} failed to resolve", path.display())
    })?;

    let mut machine = Interpreter::new(&resolved, stack_bytes, cycle_limit);
    machine.run().map_err(|with_source| {
        for err in with_source.errors() {
            eprintln!("{}", err);
        }
        anyhow::anyhow!("{} failed at runtime", path.display())
    })?;
    Ok(())
}

fn main() -> Result<()> {
    let command = Command::from_args();
    match command {
        Command::Check { path } => run_check(&path),
        Command::Run { path, stack_bytes, cycle_limit } => run_program(&path, stack_bytes, cycle_limit),
    }
}
