//! Capability negotiation between a wrapper and the configuration.

use stash_core::Config;

/// Features a wrapper may declare. The set is closed: the driver only ever
/// dispatches on these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create missing parent directories of target paths on a hit.
    CreateTargetDirs,
    /// The wrapper can enumerate explicit inputs for direct-mode lookups.
    DirectMode,
    /// Direct mode is required for this program, regardless of configuration.
    ForceDirectMode,
    /// Build products may be hard-linked between cache and targets.
    HardLinks,
}

/// The active feature set for one invocation.
///
/// A capability is active iff the wrapper declares it and the configuration
/// permits it; `ForceDirectMode` overrides the direct-mode gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub create_target_dirs: bool,
    pub direct_mode: bool,
    pub hard_links: bool,
}

impl Capabilities {
    pub fn negotiate(declared: &[Capability], config: &Config) -> Self {
        let mut active = Self::default();
        for capability in declared {
            match capability {
                Capability::CreateTargetDirs => {
                    active.create_target_dirs = config.create_target_dirs
                }
                Capability::DirectMode => active.direct_mode |= config.direct_mode,
                Capability::ForceDirectMode => active.direct_mode = true,
                Capability::HardLinks => active.hard_links = config.hard_links,
            }
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(direct_mode: bool, hard_links: bool) -> Config {
        let mut config = Config::with_cache_dir(PathBuf::from("/tmp/cache"));
        config.direct_mode = direct_mode;
        config.hard_links = hard_links;
        config
    }

    #[test]
    fn undeclared_capabilities_stay_off() {
        let mut permissive = config(true, true);
        permissive.create_target_dirs = true;
        let active = Capabilities::negotiate(&[], &permissive);
        assert_eq!(active, Capabilities::default());
    }

    #[test]
    fn config_gates_direct_mode() {
        let declared = [Capability::DirectMode];
        assert!(!Capabilities::negotiate(&declared, &config(false, false)).direct_mode);
        assert!(Capabilities::negotiate(&declared, &config(true, false)).direct_mode);
    }

    #[test]
    fn force_direct_mode_overrides_the_gate() {
        let declared = [Capability::ForceDirectMode];
        assert!(Capabilities::negotiate(&declared, &config(false, false)).direct_mode);
    }

    #[test]
    fn force_wins_regardless_of_declaration_order() {
        let config = config(false, false);
        for declared in [
            vec![Capability::DirectMode, Capability::ForceDirectMode],
            vec![Capability::ForceDirectMode, Capability::DirectMode],
        ] {
            assert!(Capabilities::negotiate(&declared, &config).direct_mode);
        }
    }

    #[test]
    fn config_gates_hard_links() {
        let declared = [Capability::HardLinks];
        assert!(!Capabilities::negotiate(&declared, &config(false, false)).hard_links);
        assert!(Capabilities::negotiate(&declared, &config(false, true)).hard_links);
    }

    #[test]
    fn config_gates_create_target_dirs() {
        let declared = [Capability::CreateTargetDirs];
        assert!(!Capabilities::negotiate(&declared, &config(false, false)).create_target_dirs);

        let mut permissive = config(false, false);
        permissive.create_target_dirs = true;
        assert!(Capabilities::negotiate(&declared, &permissive).create_target_dirs);
    }
}
