//! Propagation of host configuration fragments into a jail tree.
//!
//! Three fragments feed a jail: the global `make.conf` override, the
//! per-jail `<name>-make.conf` override, and the host resolver file. Each
//! is appended to the corresponding file under the jail mountpoint when it
//! exists as a regular file (symlinks and specials are skipped).
//!
//! Appending is deliberate and not idempotent: running this twice on the
//! same jail duplicates the fragments. The clean-snapshot rollback on stop
//! is what resets the destination files between builds.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::{debug, instrument, trace};

use crate::config::Config;
use crate::error::SetupError;
use crate::jail::Jail;

/// Appends the configured override fragments and resolver file into the
/// jail's `/etc/make.conf` and `/etc/resolv.conf`.
///
/// # Errors
///
/// `SetupError::Io` when a present fragment cannot be read or the
/// destination cannot be appended to. Absent fragments are skipped.
#[instrument(skip_all, fields(jail = %jail.name))]
pub fn apply(jail: &Jail, config: &Config) -> Result<(), SetupError> {
    let make_conf = jail.mountpoint.join("etc/make.conf");

    append_fragment(&config.config_dir.join("make.conf"), &make_conf)?;
    append_fragment(
        &config.config_dir.join(format!("{}-make.conf", jail.name)),
        &make_conf,
    )?;
    append_fragment(
        &config.resolv_conf,
        &jail.mountpoint.join("etc/resolv.conf"),
    )?;
    Ok(())
}

fn append_fragment(source: &Path, dest: &Path) -> Result<(), SetupError> {
    let io_error = |context: &str, source: std::io::Error| SetupError::Io {
        context: context.to_string(),
        source,
    };

    // symlink_metadata so a symlinked fragment is skipped, not followed.
    let metadata = match std::fs::symlink_metadata(source) {
        Ok(metadata) => metadata,
        Err(_) => {
            trace!(source = %source.display(), "fragment absent, skipping");
            return Ok(());
        }
    };
    if !metadata.is_file() {
        trace!(source = %source.display(), "fragment is not a regular file, skipping");
        return Ok(());
    }

    let mut from = File::open(source)
        .map_err(|e| io_error(&format!("failed to open fragment {}", source.display()), e))?;
    let mut to = OpenOptions::new()
        .append(true)
        .create(true)
        .open(dest)
        .map_err(|e| io_error(&format!("failed to open destination {}", dest.display()), e))?;

    std::io::copy(&mut from, &mut to)
        .map_err(|e| io_error(&format!("failed to append to {}", dest.display()), e))?;

    debug!(source = %source.display(), dest = %dest.display(), "appended fragment");
    Ok(())
}
