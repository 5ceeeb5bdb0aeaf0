//! The `stash` binary.
//!
//! Invoked either explicitly (`stash gcc -c foo.c -o foo.o`) or through a
//! symlink named after the wrapped compiler (ccache-style masquerading).
//! When the cache cannot handle a command, the original program runs
//! unmodified and its exit code is propagated.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use stash_cache::CacheFacade;
use stash_core::Config;
use stash_wrap::{select_wrapper, Driver, Invocation, Outcome};

#[derive(Parser)]
#[command(
    name = "stash",
    version,
    about = "Compiler cache: reuses the outputs of previous compilations"
)]
struct Cli {
    /// Remove expired and excess cache entries, then exit.
    #[arg(long = "stash-housekeeping", exclusive = true)]
    housekeeping: bool,

    /// Delete the entire local cache, then exit.
    #[arg(long = "stash-zero", exclusive = true)]
    zero: bool,

    /// The program to wrap, followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let config = Config::from_env();
    init_tracing(&config);

    match run(&config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stash: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<ExitCode> {
    let command = match masqueraded_command() {
        // Invoked through a compiler-named symlink: argv is the compiler's.
        Some(command) => command,
        None => {
            let cli = Cli::parse();
            if cli.housekeeping {
                return run_housekeeping(config);
            }
            if cli.zero {
                return run_zero(config);
            }
            if cli.command.is_empty() {
                bail!("no command given; usage: stash <program> [args...]");
            }
            cli.command
        }
    };

    let Some(exe_path) = find_program(&command[0]) else {
        bail!("cannot find program {:?} in PATH", command[0]);
    };
    let invocation = Invocation::new(exe_path, command);

    if let Some(mut wrapper) = select_wrapper(&invocation) {
        let facade = CacheFacade::from_config(config);
        let driver = Driver::new(config, &facade);
        if let Outcome::Handled(code) = driver.handle_command(wrapper.as_mut(), &invocation) {
            return Ok(exit_code(code));
        }
        tracing::debug!(
            target = "stash.cli",
            program = invocation.program_name(),
            "running the original program unmodified"
        );
    } else {
        tracing::debug!(
            target = "stash.cli",
            program = invocation.program_name(),
            "no wrapper for this program"
        );
    }

    run_original(&invocation)
}

/// Executes the wrapped program with inherited stdio.
fn run_original(invocation: &Invocation) -> Result<ExitCode> {
    let status = std::process::Command::new(&invocation.exe_path)
        .args(&invocation.args[1..])
        .status()
        .with_context(|| format!("failed to execute {}", invocation.exe_path.display()))?;
    Ok(exit_code(status.code().unwrap_or(1)))
}

fn run_housekeeping(config: &Config) -> Result<ExitCode> {
    let facade = CacheFacade::from_config(config);
    let report = facade.housekeeping().context("housekeeping failed")?;
    println!(
        "evicted {} entries, removed {} leftovers, freed {} bytes, {} bytes in use",
        report.evicted_entries, report.removed_leftovers, report.freed_bytes, report.total_bytes
    );
    Ok(ExitCode::SUCCESS)
}

fn run_zero(config: &Config) -> Result<ExitCode> {
    if config.read_only {
        bail!("refusing to clear the cache in read-only mode");
    }
    match std::fs::metadata(&config.cache_dir) {
        Ok(_) => {
            stash_core::fs::remove_dir_all_nofollow(&config.cache_dir)
                .with_context(|| format!("failed to clear {}", config.cache_dir.display()))?;
            println!("cleared {}", config.cache_dir.display());
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("{} does not exist; nothing to do", config.cache_dir.display());
        }
        Err(err) => return Err(err.into()),
    }
    Ok(ExitCode::SUCCESS)
}

/// When argv0 is not `stash`, the binary is masquerading as the wrapped
/// program and the whole argv belongs to it.
fn masqueraded_command() -> Option<Vec<String>> {
    let args: Vec<String> = std::env::args().collect();
    let name = Path::new(args.first()?)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();
    if name == "stash" {
        return None;
    }
    let mut command = args;
    command[0] = name;
    Some(command)
}

/// Finds `program` in PATH, skipping any candidate that is this binary
/// itself (a masquerading symlink must not recurse into us).
fn find_program(program: &str) -> Option<PathBuf> {
    let program_path = Path::new(program);
    if program_path.components().count() > 1 {
        return program_path.exists().then(|| program_path.to_path_buf());
    }

    let own_exe = std::env::current_exe()
        .and_then(std::fs::canonicalize)
        .ok();
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if !candidate.is_file() {
            continue;
        }
        if let (Some(own), Ok(resolved)) = (&own_exe, std::fs::canonicalize(&candidate)) {
            if &resolved == own {
                continue;
            }
        }
        return Some(candidate);
    }
    None
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)
            .unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path);
            match file {
                Ok(file) => builder.with_writer(std::sync::Mutex::new(file)).init(),
                Err(_) => builder.with_writer(std::io::stderr).init(),
            }
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(clamp_code(code))
}

fn clamp_code(code: i32) -> u8 {
    code.clamp(0, 255) as u8
}
