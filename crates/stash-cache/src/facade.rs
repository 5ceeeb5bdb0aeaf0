//! The cache facade: an ordered list of tiers, local first.
//!
//! Lookups probe tiers in order; a hit in a remote tier back-populates the
//! local store so future lookups stay local. Commits go to the local store
//! first and are then mirrored to writable remotes. Remote failures are never
//! fatal: they are logged and read as misses (or silently dropped commits)
//! for that tier, and the local tier's result is authoritative.

use std::path::PathBuf;

use stash_core::Config;

use crate::entry::{CacheEntry, ExpectedFiles};
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::local::{HousekeepingReport, LocalCache, Lookup, PlacementOptions};
use crate::remote::{remote_for_url, RemoteCache};

pub struct CacheFacade {
    local: LocalCache,
    remotes: Vec<Box<dyn RemoteCache>>,
    read_only: bool,
    remote_read_only: bool,
}

impl CacheFacade {
    /// Builds the tier list from the configuration. Endpoints with an
    /// unsupported scheme are logged and skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut remotes = Vec::new();
        for url in &config.remotes {
            match remote_for_url(url) {
                Ok(remote) => remotes.push(remote),
                Err(err) => {
                    tracing::warn!(
                        target = "stash.cache",
                        url = %url,
                        error = %err,
                        "ignoring remote cache endpoint"
                    );
                }
            }
        }

        Self {
            local: LocalCache::new(config),
            remotes,
            read_only: config.read_only,
            remote_read_only: config.remote_read_only,
        }
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Probes the tiers for `pf`; the first hit wins.
    pub fn lookup(
        &self,
        pf: &Fingerprint,
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        if let hit @ Lookup::Hit(_) = self.local.lookup(pf, expected, options)? {
            return Ok(hit);
        }

        for remote in &self.remotes {
            let archive = match remote.fetch(pf) {
                Ok(Some(archive)) => archive,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        target = "stash.cache",
                        url = remote.url(),
                        fingerprint = %pf,
                        error = %err,
                        "remote lookup failed; treating as miss"
                    );
                    continue;
                }
            };

            tracing::debug!(
                target = "stash.cache",
                url = remote.url(),
                fingerprint = %pf,
                "remote cache hit"
            );

            if self.read_only {
                // Cannot back-populate; serve the hit from scratch space.
                if let hit @ Lookup::Hit(_) =
                    self.materialize_archive(&archive, expected, options)?
                {
                    return Ok(hit);
                }
                continue;
            }

            match self.local.install_archive(pf, &archive) {
                Ok(true) => {
                    if let hit @ Lookup::Hit(_) = self.local.lookup(pf, expected, options)? {
                        return Ok(hit);
                    }
                }
                Ok(false) => {
                    tracing::warn!(
                        target = "stash.cache",
                        url = remote.url(),
                        fingerprint = %pf,
                        "remote returned an unusable archive; treating as miss"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        target = "stash.cache",
                        url = remote.url(),
                        fingerprint = %pf,
                        error = %err,
                        "failed to install remote entry; treating as miss"
                    );
                }
            }
        }

        Ok(Lookup::Miss)
    }

    /// Commits to the local store and mirrors to writable remotes.
    ///
    /// The local result is authoritative; remote upload failures are logged
    /// and dropped.
    pub fn add(
        &self,
        pf: &Fingerprint,
        entry: &CacheEntry,
        expected: &ExpectedFiles,
        allow_hard_links: bool,
    ) -> Result<()> {
        self.local.add(pf, entry, expected, allow_hard_links)?;

        if self.remotes.is_empty() || self.remote_read_only {
            return Ok(());
        }

        let archive = match self.local.export_archive(pf) {
            Ok(Some(archive)) => archive,
            Ok(None) => return Ok(()),
            Err(err) => {
                tracing::warn!(
                    target = "stash.cache",
                    fingerprint = %pf,
                    error = %err,
                    "failed to pack entry for remote upload"
                );
                return Ok(());
            }
        };

        for remote in &self.remotes {
            if let Err(err) = remote.store(pf, &archive) {
                tracing::warn!(
                    target = "stash.cache",
                    url = remote.url(),
                    fingerprint = %pf,
                    error = %err,
                    "remote commit failed"
                );
            }
        }
        Ok(())
    }

    /// Direct-mode lookups are local: a direct record pins local file paths,
    /// which do not transfer between machines.
    pub fn lookup_direct(
        &self,
        df: &Fingerprint,
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        self.local.lookup_direct(df, expected, options)
    }

    pub fn add_direct(
        &self,
        df: &Fingerprint,
        pf: &Fingerprint,
        implicit_inputs: &[PathBuf],
    ) -> Result<()> {
        self.local.add_direct(df, pf, implicit_inputs)
    }

    pub fn housekeeping(&self) -> Result<HousekeepingReport> {
        self.local.housekeeping()
    }

    fn materialize_archive(
        &self,
        archive: &[u8],
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        let scratch = tempfile::tempdir()?;
        crate::pack::unpack_into(archive, scratch.path())?;
        self.local
            .materialize_external(scratch.path(), expected, options)
    }
}
