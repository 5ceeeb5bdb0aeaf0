//! The lookup/commit state machine.
//!
//! For one invocation the driver computes up to two fingerprints — the direct
//! fingerprint (raw inputs, no preprocessor) and the preprocessor fingerprint
//! (the canonical key) — probes the cache tiers for each in turn, and on a
//! miss runs the program and commits its outputs. Planned strategy failures
//! (stale direct record, unreadable input, lock timeout) demote to the next
//! strategy; only an unrecoverable failure makes the whole invocation "not
//! handled", telling the caller to run the original program unmodified.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stash_cache::{
    CacheEntry, CacheFacade, CachedOutputs, CompressionMode, DataStore, Fingerprint, Lookup,
    PlacementOptions,
};
use stash_core::{Config, Hasher};

use crate::capabilities::Capabilities;
use crate::error::Result;
use crate::wrapper::{Invocation, ProgramWrapper};

/// How the driver disposed of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The cache handled the command (hit or executed-and-observed miss);
    /// exit with this code.
    Handled(i32),
    /// The cache could not handle the command; the caller should execute the
    /// original program unmodified.
    NotHandled,
}

pub struct Driver<'a> {
    config: &'a Config,
    facade: &'a CacheFacade,
}

impl<'a> Driver<'a> {
    pub fn new(config: &'a Config, facade: &'a CacheFacade) -> Self {
        Self { config, facade }
    }

    /// Runs the state machine, catching every internal error at this
    /// boundary.
    pub fn handle_command(
        &self,
        wrapper: &mut dyn ProgramWrapper,
        invocation: &Invocation,
    ) -> Outcome {
        if invocation.args.is_empty() {
            tracing::error!(target = "stash.wrap", "refusing an empty argument list");
            return Outcome::NotHandled;
        }

        match self.try_handle(wrapper, invocation) {
            Ok(exit_code) => Outcome::Handled(exit_code),
            Err(err) => {
                tracing::debug!(
                    target = "stash.wrap",
                    program = invocation.program_name(),
                    error = %err,
                    "cache cannot handle this command; falling through"
                );
                Outcome::NotHandled
            }
        }
    }

    fn try_handle(
        &self,
        wrapper: &mut dyn ProgramWrapper,
        invocation: &Invocation,
    ) -> Result<i32> {
        wrapper.resolve_args()?;
        let caps = Capabilities::negotiate(&wrapper.capabilities(), self.config);
        let expected = wrapper.build_files()?;
        let options = PlacementOptions {
            hard_links: caps.hard_links,
            create_dirs: caps.create_target_dirs,
        };

        // The hash prefix shared by both fingerprint kinds.
        let mut hasher = Hasher::new();
        for extra in &self.config.hash_extra_files {
            hasher.update_from_file(extra)?;
            hasher.inject_separator();
        }
        hasher.update(self.program_id_cached(wrapper, invocation)?);
        hasher.inject_separator();
        for argument in wrapper.relevant_arguments() {
            hasher.update(argument);
            hasher.inject_separator();
        }
        for (name, value) in wrapper.relevant_env_vars() {
            hasher.update(name);
            hasher.inject_separator();
            hasher.update(value);
            hasher.inject_separator();
        }

        // Direct mode: fingerprint the raw inputs and skip the preprocessor
        // when the shortcut is still valid.
        let mut direct: Option<Fingerprint> = None;
        if caps.direct_mode {
            let input_files = wrapper.input_files();
            if !input_files.is_empty() {
                match self.direct_fingerprint(&hasher, invocation, &input_files) {
                    Ok(df) => {
                        match self.facade.lookup_direct(&df, &expected, &options) {
                            Ok(Lookup::Hit(outputs)) => {
                                tracing::info!(
                                    target = "stash.wrap",
                                    fingerprint = %df,
                                    "direct mode cache hit"
                                );
                                return Ok(replay(&outputs));
                            }
                            Ok(Lookup::Miss) => {}
                            Err(err) => {
                                tracing::warn!(
                                    target = "stash.wrap",
                                    fingerprint = %df,
                                    error = %err,
                                    "direct mode lookup failed; trying preprocessor mode"
                                );
                            }
                        }
                        direct = Some(df);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target = "stash.wrap",
                            error = %err,
                            "direct mode hashing failed; trying preprocessor mode"
                        );
                    }
                }
            }
        }

        // Preprocessor mode: the canonical key. A failing preprocessor is an
        // error on purpose; the fallback for it is running the program, which
        // the caller does on NotHandled.
        hasher.update(wrapper.preprocess_source()?);
        let pf = Fingerprint::from_digest(hasher.finalize());

        match self.facade.lookup(&pf, &expected, &options) {
            Ok(Lookup::Hit(outputs)) => {
                tracing::info!(target = "stash.wrap", fingerprint = %pf, "cache hit");
                if !self.config.read_only {
                    if let Some(df) = &direct {
                        self.record_direct(df, &pf, &wrapper.implicit_input_files());
                    }
                }
                return Ok(replay(&outputs));
            }
            Ok(Lookup::Miss) => {}
            Err(err) => {
                tracing::warn!(
                    target = "stash.wrap",
                    fingerprint = %pf,
                    error = %err,
                    "cache lookup failed; treating as miss"
                );
            }
        }

        tracing::info!(target = "stash.wrap", fingerprint = %pf, "cache miss");

        if self.config.terminate_on_miss {
            let paths: Vec<String> = expected
                .values()
                .map(|f| f.path.display().to_string())
                .collect();
            tracing::info!(
                target = "stash.wrap",
                expected_files = %paths.join(", "),
                "terminating on miss without running the program"
            );
            return Ok(1);
        }

        let result = wrapper.run_for_miss()?;

        // Nonzero runs are not cached: preserving a transient fault would
        // replay it forever.
        if result.exit_code == 0 && !self.config.read_only {
            let file_ids: Vec<String> = expected
                .iter()
                .filter(|(_, file)| file.required || file.path.exists())
                .map(|(id, _)| id.clone())
                .collect();
            let entry = CacheEntry {
                exit_code: result.exit_code,
                stdout: result.stdout.clone(),
                stderr: result.stderr.clone(),
                file_ids,
                compression: if self.config.compress {
                    CompressionMode::All
                } else {
                    CompressionMode::None
                },
            };
            match self.facade.add(&pf, &entry, &expected, caps.hard_links) {
                Ok(()) => {
                    if let Some(df) = &direct {
                        self.record_direct(df, &pf, &wrapper.implicit_input_files());
                    }
                }
                Err(err) => {
                    // The program ran; its exit code is surfaced regardless.
                    tracing::warn!(
                        target = "stash.wrap",
                        fingerprint = %pf,
                        error = %err,
                        "failed to commit cache entry"
                    );
                }
            }
        }

        let _ = std::io::stdout().write_all(&result.stdout);
        let _ = std::io::stderr().write_all(&result.stderr);
        Ok(result.exit_code)
    }

    /// Forks the shared hash prefix into the direct-mode fingerprint.
    fn direct_fingerprint(
        &self,
        base: &Hasher,
        invocation: &Invocation,
        input_files: &[PathBuf],
    ) -> Result<Fingerprint> {
        let mut hasher = base.clone();
        hasher.inject_separator();

        // The full, unfiltered command line: direct mode never sees the
        // preprocessed output, so arguments that preprocessor mode may filter
        // (defines, include paths) must contribute here.
        for argument in &invocation.args {
            hasher.update(argument);
            hasher.inject_separator();
        }

        for file in input_files {
            // The absolute path keeps entries from different checkouts apart,
            // which avoids thrashing between concurrent build trees.
            hasher.update(absolute_path(file)?.to_string_lossy().as_bytes());
            hasher.inject_separator();
            hasher.update_from_file(file)?;
        }

        Ok(Fingerprint::from_digest(hasher.finalize()))
    }

    /// Best-effort direct-record write after a successful PF hit or commit.
    fn record_direct(&self, df: &Fingerprint, pf: &Fingerprint, implicit_inputs: &[PathBuf]) {
        if let Err(err) = self.facade.add_direct(df, pf, implicit_inputs) {
            tracing::debug!(
                target = "stash.wrap",
                fingerprint = %df,
                error = %err,
                "failed to store direct-mode record"
            );
        }
    }

    /// The memoized program identity: path+size+mtime of the binary keys a
    /// TTL'd store of the wrapper-reported identity.
    fn program_id_cached(
        &self,
        wrapper: &dyn ProgramWrapper,
        invocation: &Invocation,
    ) -> Result<String> {
        let info = match stash_core::fs::file_info(&invocation.exe_path) {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!(
                    target = "stash.wrap",
                    exe = %invocation.exe_path.display(),
                    error = %err,
                    "cannot stat program binary; querying identity uncached"
                );
                return wrapper.program_id();
            }
        };

        let mut hasher = Hasher::new();
        hasher.update(format!(
            "{}:{}:{}",
            invocation.exe_path.display(),
            info.size,
            info.mtime_millis
        ));
        let key = hasher.finalize().to_hex();

        let store = DataStore::new(
            self.facade.local().program_id_store_dir(),
            Duration::from_millis(self.config.lock_timeout_millis),
            self.config.read_only,
        );
        if let Some(identity) = store.get(&key) {
            tracing::debug!(
                target = "stash.wrap",
                program = invocation.program_name(),
                "program id served from cache"
            );
            return Ok(identity);
        }

        let identity = wrapper.program_id()?;
        if let Err(err) = store.put(&key, &identity, self.config.program_id_ttl_secs) {
            tracing::debug!(
                target = "stash.wrap",
                program = invocation.program_name(),
                error = %err,
                "failed to memoize program id"
            );
        }
        Ok(identity)
    }
}

/// Emits the captured streams on the real ones and hands back the exit code.
fn replay(outputs: &CachedOutputs) -> i32 {
    let _ = std::io::stdout().write_all(&outputs.stdout);
    let _ = std::io::stderr().write_all(&outputs.stderr);
    outputs.exit_code
}

fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
