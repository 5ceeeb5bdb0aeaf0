//! The wrapper contract: what the driver needs to know about one program.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use stash_cache::ExpectedFiles;

use crate::capabilities::Capability;
use crate::error::Result;

/// One command the cache has been asked to stand in for.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Resolved path of the wrapped program binary.
    pub exe_path: PathBuf,
    /// The full argument list, `args[0]` being the program as invoked.
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(exe_path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            exe_path: exe_path.into(),
            args,
        }
    }

    /// The program name as invoked, without any directory part.
    pub fn program_name(&self) -> &str {
        let name = self.args.first().map(String::as_str).unwrap_or_default();
        name.rsplit(['/', '\\']).next().unwrap_or(name)
    }
}

/// Captured result of executing a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunResult {
    /// Runs a command, capturing both output streams.
    pub fn capture(program: &std::path::Path, args: &[String]) -> std::io::Result<Self> {
        let output = Command::new(program).args(args).output()?;
        Ok(Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// What the driver asks of a wrapper, in call order.
///
/// There is no default behavior: a wrapper that has nothing to report for an
/// operation returns its empty value explicitly, which keeps each contract
/// implementation auditable on its own.
pub trait ProgramWrapper {
    /// Expands indirections (response files) into the canonical argument
    /// list. Called once, before anything else.
    fn resolve_args(&mut self) -> Result<()>;

    /// Features this wrapper opts into.
    fn capabilities(&self) -> Vec<Capability>;

    /// The files this command is expected to produce, keyed by file id.
    fn build_files(&self) -> Result<ExpectedFiles>;

    /// Canonical identity of the program binary (version output or a hash).
    fn program_id(&self) -> Result<String>;

    /// The subset of arguments that affects the produced bits.
    fn relevant_arguments(&self) -> Vec<String>;

    /// Environment variables that affect the produced bits.
    fn relevant_env_vars(&self) -> BTreeMap<String, String>;

    /// Explicit source inputs, hashed for direct-mode lookups.
    fn input_files(&self) -> Vec<PathBuf>;

    /// Runs the program's preprocessor and returns the expanded text.
    fn preprocess_source(&self) -> Result<Vec<u8>>;

    /// Inputs discovered after a run (headers from a depfile and the like).
    fn implicit_input_files(&self) -> Vec<PathBuf>;

    /// Executes the program for a cache miss, capturing its outputs.
    fn run_for_miss(&self) -> Result<RunResult>;
}
