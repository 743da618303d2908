//! Jail lifecycle management.
//!
//! A jail record is nothing but a name, its backing dataset, and the
//! dataset's mountpoint; it is re-derived from the property store whenever
//! needed and never cached in memory. Lifecycle state is whatever the OS
//! reports: a jail is running exactly when it has a live jail ID.
//!
//! Transitions are `STOPPED -> RUNNING -> STOPPED` with nothing persisted
//! in between — a crash mid-transition leaves OS and dataset state wherever
//! the last completed step put it. Lifecycle operations on a single jail
//! are not safe to run concurrently from multiple callers; operations on
//! distinct jails are independent.
//!
//! Nested jails are tracked in a [`JailTree`]: an arena of records with a
//! name index and parent-to-child edges, so cascading shutdown is a plain
//! post-order traversal rather than pointer chasing.

pub(crate) mod sys;

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, instrument, trace, warn};

use crate::config::Config;
use crate::error::{JailError, StoreError};
use crate::exec;
use crate::mounts;
use crate::zfs::{PropertySpec, Transport, ZfsClient};

/// Property-store type tag for jail root filesystems.
pub const JAIL_TYPE: &str = "rootfs";

/// Snapshot every jail dataset must carry; `stop` rolls back to it.
pub const CLEAN_SNAPSHOT: &str = "clean";

/// Truncation capacity for path-valued properties.
const PATH_CAPACITY: usize = 1024;

/// Filesystem kernel modules a jail needs before it can start.
const REQUIRED_MODULES: &[&str] = &["linprocfs", "linsysfs", "procfs", "nullfs"];

/// Extra module when the in-memory temp filesystem is staged.
const TMPFS_MODULE: &str = "tmpfs";

/// Networking posture of a jail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Loopback-only addressing (127.0.0.1 and ::1).
    Isolated,
    /// Full inheritance of the host's network configuration.
    InheritHost,
}

/// A build jail: name, backing dataset, and the dataset's mount location.
///
/// The mountpoint is always a path rooted at the dataset's mount location;
/// a running jail always has a corresponding OS-level jail ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jail {
    /// Unique jail name; doubles as the jail's hostname.
    pub name: String,
    /// Backing dataset (e.g. `tank/jails/10amd64`).
    pub dataset: String,
    /// Absolute path the dataset is mounted at.
    pub mountpoint: PathBuf,
}

impl Jail {
    /// Builds a jail record directly from its fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dataset: impl Into<String>,
        mountpoint: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            dataset: dataset.into(),
            mountpoint: mountpoint.into(),
        }
    }

    /// Re-derives a jail record from the property store.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when no dataset carries this jail's name.
    pub fn from_store<T: Transport>(
        client: &ZfsClient<T>,
        name: &str,
    ) -> Result<Self, StoreError> {
        let props = [
            PropertySpec::text("mountpoint", PATH_CAPACITY),
            PropertySpec::text("fs", PATH_CAPACITY),
        ];
        let row = client.query_one(JAIL_TYPE, name, &props)?;
        Ok(Self {
            name: name.to_string(),
            mountpoint: PathBuf::from(row.text(0).unwrap_or_default()),
            dataset: row.text(1).unwrap_or_default().to_string(),
        })
    }

    /// Whether the jail has a live OS-level instance.
    #[must_use]
    pub fn is_running(&self) -> bool {
        sys::jail_id(&self.name).is_some()
    }

    /// Full name of the dataset's clean snapshot.
    #[must_use]
    pub fn clean_snapshot(&self) -> String {
        format!("{}@{}", self.dataset, CLEAN_SNAPSHOT)
    }
}

/// Ownership tree for nested jails.
///
/// Records live in an arena indexed by name; edges run parent to children.
/// Teardown order is a pure function of the tree, independent of any OS
/// state.
#[derive(Debug, Default)]
pub struct JailTree {
    records: Vec<Jail>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
}

impl JailTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a jail with no parent.
    ///
    /// # Errors
    ///
    /// `JailError::AlreadyRegistered` if the name is taken.
    pub fn insert_root(&mut self, jail: Jail) -> Result<(), JailError> {
        self.insert(jail)?;
        Ok(())
    }

    /// Registers a jail as a child of `parent`.
    ///
    /// # Errors
    ///
    /// `JailError::Unknown` if the parent is not registered,
    /// `JailError::AlreadyRegistered` if the name is taken.
    pub fn insert_child(&mut self, parent: &str, jail: Jail) -> Result<(), JailError> {
        let parent_slot = *self.index.get(parent).ok_or_else(|| JailError::Unknown {
            name: parent.to_string(),
        })?;
        let slot = self.insert(jail)?;
        self.children[parent_slot].push(slot);
        Ok(())
    }

    fn insert(&mut self, jail: Jail) -> Result<usize, JailError> {
        if self.index.contains_key(&jail.name) {
            return Err(JailError::AlreadyRegistered { name: jail.name });
        }
        let slot = self.records.len();
        self.index.insert(jail.name.clone(), slot);
        self.records.push(jail);
        self.children.push(Vec::new());
        Ok(slot)
    }

    /// Looks up a registered jail by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Jail> {
        self.index.get(name).map(|&slot| &self.records[slot])
    }

    /// The jails below and including `name`, children recursively before
    /// self — the order their OS-level instances must be removed in.
    ///
    /// # Errors
    ///
    /// `JailError::Unknown` if the name is not registered.
    pub fn teardown_order(&self, name: &str) -> Result<Vec<&Jail>, JailError> {
        let root = *self.index.get(name).ok_or_else(|| JailError::Unknown {
            name: name.to_string(),
        })?;
        let mut order = Vec::new();
        self.visit(root, &mut order);
        Ok(order)
    }

    fn visit<'a>(&'a self, slot: usize, order: &mut Vec<&'a Jail>) {
        for &child in &self.children[slot] {
            self.visit(child, order);
        }
        order.push(&self.records[slot]);
    }
}

/// Drives jail lifecycle transitions against the configured substrate.
#[derive(Debug, Clone)]
pub struct JailManager {
    config: Config,
}

impl JailManager {
    /// A manager over the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a jail: loads required filesystem modules, stages the
    /// supporting mounts, and creates the OS-level jail.
    ///
    /// A jail that is already running is a diagnostic no-op. A module that
    /// cannot be loaded aborts the start. If jail creation itself fails,
    /// supporting mounts already attached are left in place — there is no
    /// rollback of partial start state.
    ///
    /// # Errors
    ///
    /// `JailError::ModuleLoad` or `JailError::Create`.
    #[instrument(skip(self, jail), fields(jail = %jail.name))]
    pub fn start(&self, jail: &Jail, mode: NetworkMode) -> Result<(), JailError> {
        if jail.is_running() {
            warn!("jail {} is already running", jail.name);
            return Ok(());
        }

        for module in self.required_modules() {
            sys::load_module(module).map_err(|err| JailError::ModuleLoad {
                module,
                detail: err.to_string(),
            })?;
        }

        mounts::stage_base_mounts(&jail.mountpoint);

        self.create(jail, mode)?;
        Ok(())
    }

    /// Stops a jail: kills every descendant jail (children before parents),
    /// kills the jail itself, tears down all mounts below its mountpoint,
    /// and rolls the dataset back to its clean snapshot.
    ///
    /// A jail that is not running is a diagnostic no-op with no OS or
    /// dataset mutation. A failed rollback leaves the dataset in an unknown
    /// state; the returned `JailError::Rollback` must be treated as fatal
    /// because the jail is unsafe to reuse.
    ///
    /// # Errors
    ///
    /// `JailError::Unknown` if `name` is not in `tree`,
    /// `JailError::Teardown` if the mount table cannot be read,
    /// `JailError::Rollback` if the snapshot restore fails.
    #[instrument(skip(self, tree))]
    pub fn stop(&self, tree: &JailTree, name: &str) -> Result<(), JailError> {
        if sys::jail_id(name).is_none() {
            warn!("no such jail: {name}");
            return Ok(());
        }

        let jail = tree.get(name).ok_or_else(|| JailError::Unknown {
            name: name.to_string(),
        })?;

        for member in tree.teardown_order(name)? {
            self.kill(&member.name);
        }

        mounts::teardown(&jail.mountpoint).map_err(|source| JailError::Teardown {
            name: name.to_string(),
            source,
        })?;

        let snapshot = jail.clean_snapshot();
        debug!(%snapshot, "rolling dataset back");
        let status = exec::run(&self.config.zfs_command, &["rollback", "-R", &snapshot])
            .map_err(|err| {
                warn!(error = %err, "rollback command could not run");
                JailError::Rollback {
                    snapshot: snapshot.clone(),
                }
            })?;
        if status != 0 {
            return Err(JailError::Rollback { snapshot });
        }
        Ok(())
    }

    /// Removes a jail's OS-level instance if it has one.
    ///
    /// Tolerant of "not running"; a failed removal is logged, not raised.
    pub fn kill(&self, name: &str) {
        match sys::jail_id(name) {
            None => trace!(jail = name, "not running, nothing to kill"),
            Some(jid) => {
                debug!(jail = name, jid, "removing jail instance");
                if let Err(err) = sys::remove(jid) {
                    warn!(jail = name, error = %err, "failed to stop jail");
                }
            }
        }
    }

    /// Creates the OS-level jail, removing any stale instance first.
    fn create(&self, jail: &Jail, mode: NetworkMode) -> Result<i32, JailError> {
        if let Some(stale) = sys::jail_id(&jail.name) {
            if let Err(err) = sys::remove(stale) {
                warn!(jail = %jail.name, error = %err, "failed to remove stale jail instance");
            }
        }

        debug!(jail = %jail.name, ?mode, "starting jail");
        sys::create(&jail.name, &jail.mountpoint, mode).map_err(|err| JailError::Create {
            name: jail.name.clone(),
            detail: err.to_string(),
        })
    }

    fn required_modules(&self) -> impl Iterator<Item = &'static str> {
        REQUIRED_MODULES
            .iter()
            .copied()
            .chain(self.config.use_tmpfs.then_some(TMPFS_MODULE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::zfs::Transport;
    use std::path::Path;

    struct Fixture(&'static str);

    impl Transport for Fixture {
        fn capture(&self, _program: &Path, _args: &[&str]) -> Result<String, ExecError> {
            Ok(self.0.to_string())
        }
    }

    fn jail(name: &str) -> Jail {
        Jail::new(name, format!("tank/jails/{name}"), format!("/jails/{name}"))
    }

    #[test]
    fn test_clean_snapshot_name() {
        let j = jail("10amd64");
        assert_eq!(j.clean_snapshot(), "tank/jails/10amd64@clean");
    }

    #[test]
    fn test_from_store_round_trip() {
        let text = "rootfs\t10amd64\t/jails/10amd64\ttank/jails/10amd64\n";
        let client = ZfsClient::with_transport(Fixture(text), "/sbin/zfs");

        let j = Jail::from_store(&client, "10amd64").expect("lookup failed");
        assert_eq!(j.name, "10amd64");
        assert_eq!(j.mountpoint, PathBuf::from("/jails/10amd64"));
        assert_eq!(j.dataset, "tank/jails/10amd64");
    }

    #[test]
    fn test_from_store_not_found() {
        let client = ZfsClient::with_transport(Fixture("ports\tx\t/a\tb\n"), "/sbin/zfs");
        let err = Jail::from_store(&client, "10amd64").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_tree_rejects_duplicate_names() {
        let mut tree = JailTree::new();
        tree.insert_root(jail("a")).expect("first insert failed");
        let err = tree.insert_root(jail("a")).unwrap_err();
        assert!(matches!(err, JailError::AlreadyRegistered { .. }));
    }

    #[test]
    fn test_tree_rejects_unknown_parent() {
        let mut tree = JailTree::new();
        let err = tree.insert_child("ghost", jail("a")).unwrap_err();
        assert!(matches!(err, JailError::Unknown { .. }));
    }

    #[test]
    fn test_teardown_order_children_before_parent() {
        let mut tree = JailTree::new();
        tree.insert_root(jail("parent")).expect("insert parent");
        tree.insert_child("parent", jail("child1")).expect("insert child1");
        tree.insert_child("parent", jail("child2")).expect("insert child2");
        tree.insert_child("child2", jail("grandchild")).expect("insert grandchild");

        let order: Vec<&str> = tree
            .teardown_order("parent")
            .expect("teardown order failed")
            .iter()
            .map(|j| j.name.as_str())
            .collect();

        let position = |name: &str| {
            order
                .iter()
                .position(|n| *n == name)
                .unwrap_or_else(|| panic!("{name} missing"))
        };
        // Both children precede the parent; the grandchild precedes its parent.
        assert!(position("child1") < position("parent"));
        assert!(position("child2") < position("parent"));
        assert!(position("grandchild") < position("child2"));
        assert_eq!(order.last().copied(), Some("parent"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_teardown_order_unknown_name() {
        let tree = JailTree::new();
        let err = tree.teardown_order("ghost").unwrap_err();
        assert!(matches!(err, JailError::Unknown { .. }));
    }

    #[test]
    fn test_stop_when_stopped_is_a_no_op() {
        // The running check precedes every mutation, so a stopped (or
        // unresolvable) jail produces a diagnostic and nothing else.
        let manager = JailManager::new(Config::default());
        let tree = JailTree::new();
        manager
            .stop(&tree, "not-running")
            .expect("stop of a stopped jail must succeed");
    }

    #[test]
    fn test_kill_tolerates_not_running() {
        let manager = JailManager::new(Config::default());
        manager.kill("not-running");
    }
}
