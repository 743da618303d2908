//! buildjail - jail and dataset orchestration for package-build sandboxes.
//!
//! This crate is the substrate a package-building pipeline runs on: it
//! manages isolated build jails rooted in copy-on-write ZFS datasets,
//! assembles each jail's filesystem view out of pass-through mounts (ports
//! tree, package output, distfile cache), and restores the dataset's clean
//! snapshot after every build.
//!
//! Jail and ports-tree metadata is kept in custom dataset properties and
//! read back through captured `zfs list` output; nothing is cached, every
//! query hits the live store.
//!
//! # Platform Requirements
//!
//! The OS-coupled layer targets FreeBSD: jail(2), nmount(2) with nullfs,
//! getmntinfo(3), and kld(2) module loading. On other systems those
//! operations report `Unsupported`, while the property store, teardown
//! planning, and configuration propagation remain fully functional.
//!
//! # Example
//!
//! ```no_run
//! use buildjail::{Config, Jail, JailManager, JailTree, NetworkMode, ZfsClient};
//!
//! fn main() -> buildjail::Result<()> {
//!     let config = Config::default().with_distfiles_cache("/pool/distfiles");
//!     let client = ZfsClient::new(&config);
//!
//!     let jail = Jail::from_store(&client, "10amd64")?;
//!     let mut tree = JailTree::new();
//!     tree.insert_root(jail.clone())?;
//!
//!     let manager = JailManager::new(config);
//!     manager.start(&jail, NetworkMode::Isolated)?;
//!     // ... run build steps with exec::run_in_jail ...
//!     manager.stop(&tree, "10amd64")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod jail;
pub mod mounts;
pub mod ports;
pub mod setup;
pub mod zfs;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use jail::{Jail, JailManager, JailTree, NetworkMode};
pub use ports::{PortTree, PortTreeListing};
pub use zfs::{PropertySpec, PropertyValue, ZfsClient};
