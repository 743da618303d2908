//! Global configuration for the build substrate.
//!
//! The configuration is loaded by the embedding program (the CLI dispatcher is
//! an external collaborator) and passed explicitly into every component that
//! needs it. Nothing in this crate reads process-wide state, so tests can
//! supply fixtures without touching the host.

use std::path::PathBuf;

/// Read-only tunables consumed by the lifecycle, mount, and setup layers.
///
/// # Example
///
/// ```
/// use buildjail::Config;
///
/// let config = Config::default()
///     .with_data_dir("/pool/build/data")
///     .with_distfiles_cache("/pool/build/distfiles")
///     .with_use_tmpfs(true);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for build data (package output lives under
    /// `<data_dir>/packages`).
    pub data_dir: PathBuf,

    /// Shared distfile cache projected into every jail, if present.
    pub distfiles_cache: Option<PathBuf>,

    /// Host resolver file appended into each jail's `/etc/resolv.conf`.
    pub resolv_conf: PathBuf,

    /// Directory holding `make.conf` override fragments (global and
    /// per-jail).
    pub config_dir: PathBuf,

    /// Whether the temporary in-memory filesystem should be staged for
    /// builds (its kernel module is loaded at jail start).
    pub use_tmpfs: bool,

    /// Path to the `zfs` utility used for listings and rollback.
    pub zfs_command: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/usr/local/buildjail/data"),
            distfiles_cache: None,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            config_dir: PathBuf::from("/usr/local/etc/buildjail.d"),
            use_tmpfs: false,
            zfs_command: PathBuf::from("/sbin/zfs"),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the build data root.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the shared distfile cache directory.
    #[must_use]
    pub fn with_distfiles_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.distfiles_cache = Some(path.into());
        self
    }

    /// Sets the host resolver file propagated into jails.
    #[must_use]
    pub fn with_resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolv_conf = path.into();
        self
    }

    /// Sets the override-fragment directory.
    #[must_use]
    pub fn with_config_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_dir = path.into();
        self
    }

    /// Enables or disables staging of the in-memory temp filesystem.
    #[must_use]
    pub fn with_use_tmpfs(mut self, use_tmpfs: bool) -> Self {
        self.use_tmpfs = use_tmpfs;
        self
    }

    /// Sets the path to the `zfs` utility.
    #[must_use]
    pub fn with_zfs_command(mut self, path: impl Into<PathBuf>) -> Self {
        self.zfs_command = path.into();
        self
    }

    /// Package output directory for a jail/tree pair
    /// (`<data_dir>/packages/<jail>-<tree>`).
    #[must_use]
    pub fn packages_dir(&self, jail_name: &str, tree_name: &str) -> PathBuf {
        self.data_dir
            .join("packages")
            .join(format!("{jail_name}-{tree_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.distfiles_cache.is_none());
        assert!(!config.use_tmpfs);
        assert_eq!(config.resolv_conf, PathBuf::from("/etc/resolv.conf"));
        assert_eq!(config.zfs_command, PathBuf::from("/sbin/zfs"));
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::new()
            .with_data_dir("/pool/data")
            .with_distfiles_cache("/pool/distfiles")
            .with_resolv_conf("/etc/resolv.conf.build")
            .with_config_dir("/etc/buildjail.d")
            .with_use_tmpfs(true)
            .with_zfs_command("/usr/local/sbin/zfs");

        assert_eq!(config.data_dir, PathBuf::from("/pool/data"));
        assert_eq!(config.distfiles_cache, Some(PathBuf::from("/pool/distfiles")));
        assert_eq!(config.resolv_conf, PathBuf::from("/etc/resolv.conf.build"));
        assert_eq!(config.config_dir, PathBuf::from("/etc/buildjail.d"));
        assert!(config.use_tmpfs);
        assert_eq!(config.zfs_command, PathBuf::from("/usr/local/sbin/zfs"));
    }

    #[test]
    fn test_packages_dir() {
        let config = Config::default().with_data_dir("/pool/data");
        assert_eq!(
            config.packages_dir("10amd64", "default"),
            PathBuf::from("/pool/data/packages/10amd64-default")
        );
    }
}
