//! Typed client for the dataset property store.
//!
//! Jail and ports-tree metadata lives in custom properties of the backing
//! datasets (`buildjail:type`, `buildjail:name`, and so on), read back
//! exclusively through the captured output of the `zfs list` utility. This
//! module turns that tabular text protocol into typed records behind two
//! operations: [`ZfsClient::list_all`] (every object of a type) and
//! [`ZfsClient::query_one`] (point lookup by type and name).
//!
//! The command transport is injectable so the tokenizer and decoder can be
//! exercised against crafted fixtures, and so a structured-output transport
//! could replace the text protocol without touching callers.
//!
//! There is no caching and no snapshot isolation: every operation re-issues
//! the external listing, and two calls — or a call racing an external
//! mutation of the store — can observe different states.

mod parse;

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{ExecError, StoreError};
use crate::exec;

/// Namespace prefix for the custom properties this tool owns.
pub const PROPERTY_NAMESPACE: &str = "buildjail";

/// Semantic type of one requested property column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Copied verbatim, truncated past `capacity` characters.
    Text { capacity: usize },
    /// Unsigned decimal bounded to the platform integer range; the literal
    /// `-` decodes to zero.
    Integer,
}

/// One entry of a property query: which property, decoded how.
///
/// The order and count of specs must match the columns of the listing
/// exactly; the row width is derived from them.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertySpec {
    /// A text-typed property with the given truncation capacity.
    #[must_use]
    pub fn text(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Text { capacity },
        }
    }

    /// An integer-typed property.
    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Integer,
        }
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Integer(u64),
}

/// One decoded row, values in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRow {
    values: Vec<PropertyValue>,
}

impl PropertyRow {
    /// All values in request order.
    #[must_use]
    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    /// The text value at `index`, if that column is text-typed.
    #[must_use]
    pub fn text(&self, index: usize) -> Option<&str> {
        match self.values.get(index) {
            Some(PropertyValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// The integer value at `index`, if that column is integer-typed.
    #[must_use]
    pub fn integer(&self, index: usize) -> Option<u64> {
        match self.values.get(index) {
            Some(PropertyValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }
}

/// Command transport the client issues listings through.
///
/// The default implementation shells out; tests substitute fixtures.
pub trait Transport {
    /// Runs `program` with `args` and returns its captured stdout.
    fn capture(&self, program: &Path, args: &[&str]) -> Result<String, ExecError>;
}

/// Transport backed by real subprocess execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl Transport for SystemTransport {
    fn capture(&self, program: &Path, args: &[&str]) -> Result<String, ExecError> {
        exec::capture(program, args)
    }
}

/// Typed client over the property listing protocol.
#[derive(Debug, Clone)]
pub struct ZfsClient<T = SystemTransport> {
    transport: T,
    zfs_command: PathBuf,
}

impl ZfsClient<SystemTransport> {
    /// Client using the configured `zfs` utility over the system transport.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            transport: SystemTransport,
            zfs_command: config.zfs_command.clone(),
        }
    }
}

impl<T: Transport> ZfsClient<T> {
    /// Client over a caller-supplied transport.
    #[must_use]
    pub fn with_transport(transport: T, zfs_command: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            zfs_command: zfs_command.into(),
        }
    }

    /// Lists every object of `object_type`, decoding the requested
    /// properties for each.
    ///
    /// Issues one recursive listing of `type` plus the N requested
    /// properties, consumes tokens in fixed groups of N+1, and keeps only
    /// rows whose leading type token matches. An empty store yields an
    /// empty vector.
    pub fn list_all(
        &self,
        object_type: &str,
        props: &[PropertySpec],
    ) -> Result<Vec<PropertyRow>, StoreError> {
        let columns = self.columns(&["type"], props);
        let text = match self.issue_listing(&columns) {
            Ok(text) => text,
            Err(ExecError::EmptyOutput { .. }) => {
                debug!(object_type, "property listing is empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let width = 1 + props.len();
        let mut records = Vec::new();
        for row in parse::rows(&text, width) {
            if row[0] != object_type {
                continue;
            }
            records.push(parse::decode_row(props, &row[1..])?);
        }
        trace!(object_type, count = records.len(), "decoded listing");
        Ok(records)
    }

    /// Looks up the single object of `object_type` named `name`.
    ///
    /// Same tokenization as [`list_all`](Self::list_all) with a `name`
    /// column after `type`; scanning stops at the first row matching both.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when the listing is exhausted (or empty)
    /// without a match.
    pub fn query_one(
        &self,
        object_type: &str,
        name: &str,
        props: &[PropertySpec],
    ) -> Result<PropertyRow, StoreError> {
        let not_found = || StoreError::NotFound {
            object_type: object_type.to_string(),
            name: name.to_string(),
        };

        let columns = self.columns(&["type", "name"], props);
        let text = match self.issue_listing(&columns) {
            Ok(text) => text,
            Err(ExecError::EmptyOutput { .. }) => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };

        let width = 2 + props.len();
        for row in parse::rows(&text, width) {
            if row[0] == object_type && row[1] == name {
                return parse::decode_row(props, &row[2..]);
            }
        }
        Err(not_found())
    }

    fn columns(&self, fixed: &[&str], props: &[PropertySpec]) -> String {
        fixed
            .iter()
            .map(|name| format!("{PROPERTY_NAMESPACE}:{name}"))
            .chain(
                props
                    .iter()
                    .map(|spec| format!("{PROPERTY_NAMESPACE}:{}", spec.name)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn issue_listing(&self, columns: &str) -> Result<String, ExecError> {
        let args = ["list", "-r", "-H", "-o", columns];
        trace!(?args, "issuing property listing");
        self.transport.capture(&self.zfs_command, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport returning canned listing text.
    struct Fixture(&'static str);

    impl Transport for Fixture {
        fn capture(&self, _program: &Path, _args: &[&str]) -> Result<String, ExecError> {
            if self.0.is_empty() {
                return Err(ExecError::EmptyOutput {
                    command: "zfs".to_string(),
                });
            }
            Ok(self.0.to_string())
        }
    }

    fn client(text: &'static str) -> ZfsClient<Fixture> {
        ZfsClient::with_transport(Fixture(text), "/sbin/zfs")
    }

    #[test]
    fn test_list_all_filters_by_type() {
        // Interleaved object types in one listing.
        let text = "ports\tdefault\tportsnap\n\
                    rootfs\t10amd64\tftp\n\
                    ports\texp\tsvn\n";
        let props = [
            PropertySpec::text("name", 64),
            PropertySpec::text("method", 64),
        ];

        let rows = client(text).list_all("ports", &props).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text(0), Some("default"));
        assert_eq!(rows[0].text(1), Some("portsnap"));
        assert_eq!(rows[1].text(0), Some("exp"));
    }

    #[test]
    fn test_list_all_empty_store() {
        let props = [PropertySpec::text("name", 64)];
        let rows = client("").list_all("ports", &props).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_one_round_trip() {
        let text = "rootfs\t9amd64\t/jails/9amd64\t5\n\
                    rootfs\t10amd64\t/jails/10amd64\t-\n";
        let props = [
            PropertySpec::text("mountpoint", 256),
            PropertySpec::integer("builds"),
        ];

        let row = client(text)
            .query_one("rootfs", "10amd64", &props)
            .unwrap();
        assert_eq!(row.text(0), Some("/jails/10amd64"));
        // Unset integer properties decode as zero.
        assert_eq!(row.integer(1), Some(0));

        let row = client(text).query_one("rootfs", "9amd64", &props).unwrap();
        assert_eq!(row.integer(1), Some(5));
    }

    #[test]
    fn test_query_one_requires_both_type_and_name() {
        let text = "ports\t10amd64\t/trees/x\nrootfs\tother\t/jails/other\n";
        let props = [PropertySpec::text("mountpoint", 256)];

        let err = client(text)
            .query_one("rootfs", "10amd64", &props)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_query_one_empty_store_is_not_found() {
        let props = [PropertySpec::text("mountpoint", 256)];
        let err = client("").query_one("rootfs", "x", &props).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_typed_accessors_reject_mismatched_kind() {
        let text = "rootfs\tj\t/jails/j\t3\n";
        let props = [
            PropertySpec::text("mountpoint", 256),
            PropertySpec::integer("builds"),
        ];
        let row = client(text).query_one("rootfs", "j", &props).unwrap();
        assert!(row.integer(0).is_none());
        assert!(row.text(1).is_none());
        assert_eq!(row.values().len(), 2);
    }
}
