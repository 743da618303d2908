//! Mount assembly and teardown for jail filesystem views.
//!
//! A jail's filesystem view is layered together from pass-through (nullfs)
//! projections of the ports tree, the package output directory, and the
//! optional distfile cache, plus the supporting virtual filesystems (devfs,
//! procfs, and the Linux-compat process/sys views) staged before the jail
//! itself is created.
//!
//! Failure severity differs by layer: a supporting mount that cannot be
//! attached is logged and tolerated, while a failed build projection is
//! unsafe to continue past — a build running against a partial overlay
//! would write into the jail dataset instead of the package output tree.
//!
//! Teardown never tracks what was mounted; it re-reads the live mount table
//! and force-unmounts everything strictly below the jail mountpoint,
//! deepest paths first, so nested mounts detach before their parents.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace, warn};

use crate::config::Config;
use crate::error::MountError;
use crate::jail::Jail;
use crate::ports::PortTree;

/// Supporting filesystems staged under a jail mountpoint before the jail
/// starts, in mount order.
const BASE_MOUNTS: &[(&str, &str)] = &[
    ("dev", "devfs"),
    ("compat/linux/proc", "linprocfs"),
    ("compat/linux/sys", "linsysfs"),
    ("proc", "procfs"),
];

/// Creates every missing component of `path`.
///
/// Already-existing components are success; only other creation failures
/// are errors, so repeated calls are harmless.
pub fn ensure_tree(path: &Path) -> Result<(), MountError> {
    std::fs::create_dir_all(path).map_err(|source| MountError::CreateDir {
        path: path.display().to_string(),
        source,
    })
}

/// Projects `source` so its contents appear at `target` without copying.
///
/// Both endpoints are created first. Used to mirror host/dataset paths
/// under the jail mountpoint.
///
/// # Errors
///
/// Any failure here leaves the jail's filesystem view inconsistent; callers
/// on the build path must treat it as fatal.
pub fn mount_nullfs(source: &Path, target: &Path) -> Result<(), MountError> {
    ensure_tree(source)?;
    ensure_tree(target)?;
    trace!(source = %source.display(), target = %target.display(), "attaching nullfs");
    attach("nullfs", target, Some(source))
}

/// Assembles the build projections for a jail/tree pair: the ports tree at
/// `usr/ports`, the package output directory at `usr/ports/packages`, and
/// the distfile cache (when configured) at `usr/ports/distfiles`.
#[instrument(skip_all, fields(jail = %jail.name, tree = %tree.name))]
pub fn stage_build_mounts(jail: &Jail, tree: &PortTree, config: &Config) -> Result<(), MountError> {
    debug!("staging build mounts");

    mount_nullfs(&tree.ports_dir(), &jail.mountpoint.join("usr/ports"))?;

    let packages = config.packages_dir(&jail.name, &tree.name);
    mount_nullfs(&packages, &jail.mountpoint.join("usr/ports/packages"))?;

    if let Some(cache) = &config.distfiles_cache {
        mount_nullfs(cache, &jail.mountpoint.join("usr/ports/distfiles"))?;
    }

    Ok(())
}

/// Stages the supporting virtual filesystems under a jail mountpoint.
///
/// Each entry is independent: a failed directory or mount logs a warning
/// and the rest continue, leaving the jail degraded rather than unstartable.
#[instrument(skip_all, fields(mountpoint = %mountpoint.display()))]
pub fn stage_base_mounts(mountpoint: &Path) {
    for &(subpath, fstype) in BASE_MOUNTS {
        let target = mountpoint.join(subpath);
        if let Err(err) = ensure_tree(&target) {
            warn!(target = %target.display(), error = %err, "failed to create mount directory");
            continue;
        }
        if let Err(err) = attach(fstype, &target, None) {
            warn!(target = %target.display(), error = %err, "failed to attach supporting mount");
        }
    }
}

/// Selects and orders the mounts to detach when tearing down the view
/// rooted at `root`.
///
/// Keeps strict path-component descendants of `root` — never `root`
/// itself, never byte-prefix siblings like `/jail-other` under `/jail` —
/// sorted by segment count descending (ties lexicographically descending)
/// so nested mounts are removed before their parents.
#[must_use]
pub fn teardown_targets(mounts: &[PathBuf], root: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = mounts
        .iter()
        .filter(|mount| mount.starts_with(root) && mount.as_path() != root)
        .cloned()
        .collect();

    targets.sort_by(|a, b| {
        let depth = |p: &Path| p.components().count();
        depth(b).cmp(&depth(a)).then_with(|| b.cmp(a))
    });
    targets
}

/// Force-unmounts every mount strictly below `root`, deepest first.
///
/// The live mount table is re-read on every call. Individual unmount
/// failures are logged and skipped; an unreadable mount table is an error
/// because teardown cannot proceed blind.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn teardown(root: &Path) -> Result<(), MountError> {
    let mounts = mount_points()?;
    let targets = teardown_targets(&mounts, root);
    debug!(count = targets.len(), "detaching descendant mounts");

    for target in &targets {
        if let Err(err) = force_unmount(target) {
            warn!(target = %target.display(), error = %err, "failed to unmount");
        }
    }
    Ok(())
}

#[cfg(target_os = "freebsd")]
fn attach(fstype: &'static str, target: &Path, origin: Option<&Path>) -> Result<(), MountError> {
    use nix::mount::{MntFlags, Nmount};

    let mut mount = Nmount::new();
    mount
        .str_opt_owned("fstype", fstype)
        .str_opt_owned("fspath", target);
    if let Some(origin) = origin {
        mount.str_opt_owned("target", origin);
    }

    mount
        .nmount(MntFlags::empty())
        .map_err(|err| MountError::Attach {
            fstype,
            target: target.display().to_string(),
            detail: err.to_string(),
        })
}

#[cfg(not(target_os = "freebsd"))]
fn attach(fstype: &'static str, target: &Path, _origin: Option<&Path>) -> Result<(), MountError> {
    let _ = (fstype, target);
    Err(MountError::Unsupported)
}

/// Reads every active mountpoint on the host.
#[cfg(target_os = "freebsd")]
fn mount_points() -> Result<Vec<PathBuf>, MountError> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStringExt;

    let mut table: *mut libc::statfs = std::ptr::null_mut();
    // SAFETY: getmntinfo fills in a pointer to an array it allocates and
    // retains ownership of; the array stays valid until the next call.
    let count = unsafe { libc::getmntinfo(&mut table, libc::MNT_NOWAIT) };
    if count <= 0 {
        return Err(MountError::MountTable {
            detail: std::io::Error::last_os_error().to_string(),
        });
    }

    // SAFETY: getmntinfo returned `count` valid entries at `table`.
    let entries = unsafe { std::slice::from_raw_parts(table, count as usize) };
    Ok(entries
        .iter()
        .map(|entry| {
            // SAFETY: f_mntonname is a NUL-terminated path from the kernel.
            let name = unsafe { CStr::from_ptr(entry.f_mntonname.as_ptr()) };
            PathBuf::from(std::ffi::OsString::from_vec(name.to_bytes().to_vec()))
        })
        .collect())
}

#[cfg(not(target_os = "freebsd"))]
fn mount_points() -> Result<Vec<PathBuf>, MountError> {
    Err(MountError::Unsupported)
}

#[cfg(target_os = "freebsd")]
fn force_unmount(target: &Path) -> Result<(), MountError> {
    use nix::mount::{unmount, MntFlags};

    unmount(target, MntFlags::MNT_FORCE).map_err(|err| MountError::Detach {
        target: target.display().to_string(),
        detail: err.to_string(),
    })
}

#[cfg(not(target_os = "freebsd"))]
fn force_unmount(target: &Path) -> Result<(), MountError> {
    let _ = target;
    Err(MountError::Unsupported)
}
