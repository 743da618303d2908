//! Integration tests for the build substrate's portable surface.
//!
//! These exercise the property store against crafted listing fixtures, the
//! teardown planner, and configuration propagation — everything that does
//! not need root or a FreeBSD kernel. Jail creation and real mounts are
//! covered by unit tests of their pure planning logic instead.

use std::path::{Path, PathBuf};

use buildjail::error::ExecError;
use buildjail::zfs::Transport;
use buildjail::{
    Config, Jail, JailManager, JailTree, PortTree, PropertySpec, ZfsClient,
};

/// Transport that records the issued command and replays fixture text.
struct Replay {
    text: &'static str,
}

impl Transport for Replay {
    fn capture(&self, _program: &Path, args: &[&str]) -> Result<String, ExecError> {
        // The listing request shape is part of the protocol contract.
        assert_eq!(args[0], "list");
        assert!(args.contains(&"-r"), "listing must be recursive");
        assert!(args.contains(&"-H"), "listing must omit headers");
        Ok(self.text.to_string())
    }
}

fn client(text: &'static str) -> ZfsClient<Replay> {
    ZfsClient::with_transport(Replay { text }, "/sbin/zfs")
}

#[test]
fn store_round_trip_decodes_typed_columns() {
    // One row per dataset, request-ordered columns, `-` meaning unset.
    let listing = "rootfs\t10amd64\t/jails/10amd64\ttank/jails/10amd64\t42\n\
                   rootfs\t9amd64\t/jails/9amd64\ttank/jails/9amd64\t-\n";
    let props = [
        PropertySpec::text("mountpoint", 1024),
        PropertySpec::text("fs", 1024),
        PropertySpec::integer("builds"),
    ];

    let row = client(listing)
        .query_one("rootfs", "10amd64", &props)
        .expect("lookup failed");
    assert_eq!(row.text(0), Some("/jails/10amd64"));
    assert_eq!(row.text(1), Some("tank/jails/10amd64"));
    assert_eq!(row.integer(2), Some(42));

    let row = client(listing)
        .query_one("rootfs", "9amd64", &props)
        .expect("lookup failed");
    assert_eq!(row.integer(2), Some(0), "`-` must decode to zero");
}

#[test]
fn store_listing_filters_interleaved_types() {
    let listing = "ports\tdefault\tportsnap\n\
                   rootfs\t10amd64\tftp\n\
                   ports\texp\tsvn\n\
                   rootfs\t9amd64\tftp\n";

    let trees = PortTree::list(&client(listing)).expect("list failed");
    let names: Vec<&str> = trees.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["default", "exp"]);
}

#[test]
fn jail_records_are_rederived_per_query() {
    // Two clients over diverging store states see diverging records:
    // nothing is cached between calls.
    let before = "rootfs\tbuild\t/jails/build\ttank/a\n";
    let after = "rootfs\tbuild\t/jails/build-moved\ttank/b\n";

    let first = Jail::from_store(&client(before), "build").expect("first lookup");
    let second = Jail::from_store(&client(after), "build").expect("second lookup");
    assert_eq!(first.mountpoint, PathBuf::from("/jails/build"));
    assert_eq!(second.mountpoint, PathBuf::from("/jails/build-moved"));
    assert_ne!(first.dataset, second.dataset);
}

#[test]
fn teardown_plan_unmounts_nested_before_parents() {
    let mounts = [
        PathBuf::from("/s/a"),
        PathBuf::from("/s/a/b"),
        PathBuf::from("/s/a/b/c"),
        PathBuf::from("/s/other"),
        PathBuf::from("/s"),
    ];

    let plan = buildjail::mounts::teardown_targets(&mounts, Path::new("/s"));

    assert!(!plan.contains(&PathBuf::from("/s")), "never the root itself");
    let position = |p: &str| plan.iter().position(|t| t == Path::new(p)).expect(p);
    assert!(position("/s/a/b/c") < position("/s/a/b"));
    assert!(position("/s/a/b") < position("/s/a"));
    assert!(plan.contains(&PathBuf::from("/s/other")));
}

#[test]
fn stop_of_a_stopped_jail_mutates_nothing() {
    let manager = JailManager::new(Config::default());
    let mut tree = JailTree::new();
    tree.insert_root(Jail::new("idle", "tank/jails/idle", "/jails/idle"))
        .expect("insert failed");

    // Not running: diagnostic no-op, even when the tree knows the jail.
    manager.stop(&tree, "idle").expect("stop must be a no-op");
    manager.stop(&tree, "idle").expect("and stay one on repeat");
}

#[test]
fn cascading_teardown_covers_the_whole_subtree() {
    let mut tree = JailTree::new();
    tree.insert_root(Jail::new("parent", "tank/p", "/jails/p"))
        .expect("parent");
    tree.insert_child("parent", Jail::new("left", "tank/l", "/jails/l"))
        .expect("left");
    tree.insert_child("parent", Jail::new("right", "tank/r", "/jails/r"))
        .expect("right");

    let order: Vec<&str> = tree
        .teardown_order("parent")
        .expect("order failed")
        .iter()
        .map(|jail| jail.name.as_str())
        .collect();

    assert_eq!(order.len(), 3);
    assert_eq!(order.last().copied(), Some("parent"));
    assert!(order.contains(&"left") && order.contains(&"right"));
}

#[test]
fn configuration_propagation_accumulates_on_repeat() {
    let base = tempfile::tempdir().expect("tempdir");
    let mountpoint = base.path().join("jail");
    std::fs::create_dir_all(mountpoint.join("etc")).expect("jail etc");
    let config_dir = base.path().join("overrides");
    std::fs::create_dir_all(&config_dir).expect("overrides dir");
    std::fs::write(config_dir.join("make.conf"), "WITH_DEBUG=yes\n").expect("fragment");

    let jail = Jail::new("acc", "tank/jails/acc", &mountpoint);
    let config = Config::default()
        .with_config_dir(&config_dir)
        .with_resolv_conf(base.path().join("no-resolv-here"));

    buildjail::setup::apply(&jail, &config).expect("first apply");
    buildjail::setup::apply(&jail, &config).expect("second apply");

    let written =
        std::fs::read_to_string(mountpoint.join("etc/make.conf")).expect("read make.conf");
    assert_eq!(written, "WITH_DEBUG=yes\nWITH_DEBUG=yes\n");
}

#[test]
fn directory_creation_is_idempotent() {
    let base = tempfile::tempdir().expect("tempdir");
    let nested = base.path().join("usr/ports/packages");

    buildjail::mounts::ensure_tree(&nested).expect("first pass");
    buildjail::mounts::ensure_tree(&nested).expect("second pass");
    assert!(nested.is_dir());
}
