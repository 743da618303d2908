//! Ports tree records over the property store.
//!
//! A ports tree only supplies source and target paths when its contents are
//! projected into a jail; it is not lifecycle-managed here. Creation,
//! update, and deletion of trees belong to the external tooling that also
//! owns the command-line surface.

use std::path::PathBuf;

use crate::error::StoreError;
use crate::zfs::{PropertySpec, Transport, ZfsClient};

/// Property-store type tag for ports trees.
pub const TREE_TYPE: &str = "ports";

const PATH_CAPACITY: usize = 1024;
const NAME_CAPACITY: usize = 256;

/// A checked-out ports tree: name, backing dataset, mount location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTree {
    /// Unique tree name (e.g. `default`).
    pub name: String,
    /// Backing dataset.
    pub dataset: String,
    /// Absolute path the dataset is mounted at.
    pub mountpoint: PathBuf,
}

impl PortTree {
    /// Builds a tree record directly from its fields.
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

    /// Re-derives a tree record from the property store.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when no dataset carries this tree's name.
    pub fn from_store<T: Transport>(
        client: &ZfsClient<T>,
        name: &str,
    ) -> Result<Self, StoreError> {
        let props = [
            PropertySpec::text("mountpoint", PATH_CAPACITY),
            PropertySpec::text("fs", PATH_CAPACITY),
        ];
        let row = client.query_one(TREE_TYPE, name, &props)?;
        Ok(Self {
            name: name.to_string(),
            mountpoint: PathBuf::from(row.text(0).unwrap_or_default()),
            dataset: row.text(1).unwrap_or_default().to_string(),
        })
    }

    /// The directory holding the buildable port definitions, projected to
    /// `usr/ports` inside a jail.
    #[must_use]
    pub fn ports_dir(&self) -> PathBuf {
        self.mountpoint.join("ports")
    }

    /// Lists every registered ports tree with its checkout method.
    pub fn list<T: Transport>(client: &ZfsClient<T>) -> Result<Vec<PortTreeListing>, StoreError> {
        let props = [
            PropertySpec::text("name", NAME_CAPACITY),
            PropertySpec::text("method", NAME_CAPACITY),
        ];
        let rows = client.list_all(TREE_TYPE, &props)?;
        Ok(rows
            .into_iter()
            .map(|row| PortTreeListing {
                name: row.text(0).unwrap_or_default().to_string(),
                method: row.text(1).unwrap_or_default().to_string(),
            })
            .collect())
    }
}

/// One row of the ports tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTreeListing {
    pub name: String,
    /// How the tree is checked out and updated (e.g. `portsnap`).
    pub method: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use std::path::Path;

    struct Fixture(&'static str);

    impl Transport for Fixture {
        fn capture(&self, _program: &Path, _args: &[&str]) -> Result<String, ExecError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_list_skips_other_object_types() {
        let text = "ports\tdefault\tportsnap\n\
                    rootfs\t10amd64\tftp\n\
                    ports\texperimental\tsvn\n";
        let client = ZfsClient::with_transport(Fixture(text), "/sbin/zfs");

        let trees = PortTree::list(&client).expect("list failed");
        assert_eq!(
            trees,
            vec![
                PortTreeListing {
                    name: "default".to_string(),
                    method: "portsnap".to_string()
                },
                PortTreeListing {
                    name: "experimental".to_string(),
                    method: "svn".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_from_store() {
        let text = "ports\tdefault\t/trees/default\ttank/trees/default\n";
        let client = ZfsClient::with_transport(Fixture(text), "/sbin/zfs");

        let tree = PortTree::from_store(&client, "default").expect("lookup failed");
        assert_eq!(tree.mountpoint, PathBuf::from("/trees/default"));
        assert_eq!(tree.dataset, "tank/trees/default");
        assert_eq!(tree.ports_dir(), PathBuf::from("/trees/default/ports"));
    }
}
