//! Wrapper for GCC-style C/C++ compiler drivers (`gcc`, `g++` and
//! cross-prefixed variants).
//!
//! Only single-translation-unit object compilations (`-c`) are cacheable.
//! The preprocessor fingerprint covers `-E -P` output, so include paths and
//! defines are dropped from the relevant arguments; direct mode hashes the
//! raw source and the headers recorded in the depfile instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stash_cache::{ExpectedFile, ExpectedFiles};

use crate::capabilities::Capability;
use crate::error::{Result, WrapError};
use crate::wrapper::{Invocation, ProgramWrapper, RunResult};

/// Response files may reference further response files; bound the expansion.
const MAX_RESPONSE_FILE_DEPTH: usize = 10;

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx"];

/// Two-part arguments whose value is a file or target name; neither part
/// affects the produced object bits.
const FILE_ARGS_WITH_VALUE: &[&str] = &["-I", "-MF", "-MT", "-MQ", "-o"];

pub struct GccWrapper {
    invocation: Invocation,
    /// Arguments after response-file expansion; `resolve_args` fills this.
    args: Vec<String>,
}

impl GccWrapper {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            args: Vec::new(),
        }
    }

    pub fn can_handle(invocation: &Invocation) -> bool {
        let name = invocation.program_name();
        name.contains("gcc") || name.contains("g++")
    }

    fn option_value(&self, option: &str) -> Option<&str> {
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if arg == option {
                return iter.next().map(String::as_str);
            }
        }
        None
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let mut sources = Vec::new();
        let mut skip_next = true; // args[0] is the program
        for arg in &self.args {
            if skip_next {
                skip_next = false;
                continue;
            }
            if FILE_ARGS_WITH_VALUE.contains(&arg.as_str()) {
                skip_next = true;
                continue;
            }
            if !arg.starts_with('-') && is_source_file(arg) {
                sources.push(PathBuf::from(arg));
            }
        }
        sources
    }

    /// The compile command rewritten to emit preprocessed output on stdout.
    fn preprocessor_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        let mut drop_next = false;
        for arg in &self.args[1..] {
            if drop_next {
                drop_next = false;
                continue;
            }
            match arg.as_str() {
                "-c" => continue,
                "-o" => {
                    drop_next = true;
                    continue;
                }
                _ => args.push(arg.clone()),
            }
        }
        args.push("-E".to_string());
        args.push("-P".to_string());
        args
    }
}

impl ProgramWrapper for GccWrapper {
    fn resolve_args(&mut self) -> Result<()> {
        self.args = expand_response_files(&self.invocation.args, 0)?;
        Ok(())
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::DirectMode,
            Capability::HardLinks,
            Capability::CreateTargetDirs,
        ]
    }

    fn build_files(&self) -> Result<ExpectedFiles> {
        let object = self.option_value("-o").ok_or_else(|| WrapError::Uncacheable {
            reason: "no -o target".to_string(),
        })?;

        let mut files = ExpectedFiles::new();
        files.insert("object".to_string(), ExpectedFile::required(object));
        if let Some(depfile) = self.option_value("-MF") {
            files.insert("depfile".to_string(), ExpectedFile::required(depfile));
        }
        Ok(files)
    }

    fn program_id(&self) -> Result<String> {
        let result = RunResult::capture(&self.invocation.exe_path, &["--version".to_string()])?;
        if result.exit_code != 0 {
            return Err(WrapError::ProgramId {
                reason: format!("--version exited with {}", result.exit_code),
            });
        }
        Ok(String::from_utf8_lossy(&result.stdout).into_owned())
    }

    fn relevant_arguments(&self) -> Vec<String> {
        let mut relevant = Vec::new();

        // The compiler binary without its directory part.
        relevant.push(self.invocation.program_name().to_string());

        let mut skip_next = true; // args[0] handled above
        for arg in &self.args {
            if skip_next {
                skip_next = false;
                continue;
            }
            if FILE_ARGS_WITH_VALUE.contains(&arg.as_str()) {
                skip_next = true;
                continue;
            }
            // Include paths and defines only change the preprocessed text,
            // which is hashed separately; source operands are likewise
            // covered by the preprocessed output.
            if arg.starts_with("-I") || arg.starts_with("-D") || is_source_file(arg) {
                continue;
            }
            relevant.push(arg.clone());
        }
        relevant
    }

    fn relevant_env_vars(&self) -> BTreeMap<String, String> {
        // The preprocessed text already reflects everything gcc reads from
        // the environment that matters here.
        BTreeMap::new()
    }

    fn input_files(&self) -> Vec<PathBuf> {
        self.source_files()
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        if !self.has_flag("-c") {
            return Err(WrapError::Uncacheable {
                reason: "not an object file compilation".to_string(),
            });
        }

        let result = RunResult::capture(&self.invocation.exe_path, &self.preprocessor_args())?;
        if result.exit_code != 0 {
            return Err(WrapError::Preprocess {
                reason: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(result.stdout)
    }

    fn implicit_input_files(&self) -> Vec<PathBuf> {
        let Some(depfile) = self.option_value("-MF") else {
            return Vec::new();
        };
        match std::fs::read_to_string(depfile) {
            Ok(content) => parse_depfile(&content),
            Err(err) => {
                tracing::debug!(
                    target = "stash.wrap",
                    depfile,
                    error = %err,
                    "cannot read depfile for implicit inputs"
                );
                Vec::new()
            }
        }
    }

    fn run_for_miss(&self) -> Result<RunResult> {
        Ok(RunResult::capture(
            &self.invocation.exe_path,
            &self.invocation.args[1..],
        )?)
    }
}

fn is_source_file(arg: &str) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Replaces every `@file` argument with the whitespace-separated arguments
/// read from that file, recursively.
fn expand_response_files(args: &[String], depth: usize) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        let Some(file) = arg.strip_prefix('@') else {
            expanded.push(arg.clone());
            continue;
        };
        if depth >= MAX_RESPONSE_FILE_DEPTH {
            return Err(WrapError::ResponseFile {
                path: PathBuf::from(file),
                reason: "response files nested too deeply".to_string(),
            });
        }
        let content =
            std::fs::read_to_string(file).map_err(|err| WrapError::ResponseFile {
                path: PathBuf::from(file),
                reason: err.to_string(),
            })?;
        let inner: Vec<String> = content.split_whitespace().map(String::from).collect();
        expanded.extend(expand_response_files(&inner, depth + 1)?);
    }
    Ok(expanded)
}

/// Extracts the prerequisite paths from a Makefile-style dependency rule.
///
/// Handles line continuations and `\ `-escaped spaces; the rule target(s)
/// before the colon are skipped.
fn parse_depfile(content: &str) -> Vec<PathBuf> {
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
    let Some((_, prerequisites)) = joined.split_once(':') else {
        return Vec::new();
    };

    let mut paths = Vec::new();
    let mut current = String::new();
    let mut chars = prerequisites.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                chars.next();
                current.push(' ');
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    paths.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        paths.push(PathBuf::from(current));
    }
    paths
}
