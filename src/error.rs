//! Error types for the jail build substrate.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//!
//! The taxonomy mirrors how failures are actually handled: point-lookup misses
//! (`StoreError::NotFound`) are non-fatal and left to the caller; supporting-mount
//! problems are logged and tolerated at the call site; overlay-mount failures and
//! a failed dataset rollback (`JailError::Rollback`) leave the sandbox filesystem
//! in a state that is unsafe to build in, and callers are expected to abort.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// External command execution error
    #[error("command execution failed")]
    #[diagnostic(code(buildjail::exec))]
    Exec(#[from] ExecError),

    /// Property store error
    #[error("property store error")]
    #[diagnostic(code(buildjail::store))]
    Store(#[from] StoreError),

    /// Mount layer error
    #[error("mount error")]
    #[diagnostic(code(buildjail::mount))]
    Mount(#[from] MountError),

    /// Jail lifecycle error
    #[error("jail error")]
    #[diagnostic(code(buildjail::jail))]
    Jail(#[from] JailError),

    /// Configuration propagation error
    #[error("jail setup error")]
    #[diagnostic(code(buildjail::setup))]
    Setup(#[from] SetupError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(buildjail::io))]
    Io(#[from] std::io::Error),
}

/// Errors from spawning and supervising external commands.
///
/// Spawn failure and empty output are distinct variants on purpose: callers
/// that only care about "no rows came back" can treat both the same, while
/// callers diagnosing a broken host can tell a missing binary from a silent one.
#[derive(Error, Debug, Diagnostic)]
pub enum ExecError {
    /// The command could not be started at all.
    #[error("failed to spawn {command}: {source}")]
    #[diagnostic(
        code(buildjail::exec::spawn),
        help("check that the binary exists and is executable")
    )]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but wrote zero bytes to stdout.
    #[error("{command} produced no output")]
    #[diagnostic(code(buildjail::exec::empty_output))]
    EmptyOutput { command: String },

    /// Waiting on the child failed.
    #[error("failed to wait for {command}: {source}")]
    #[diagnostic(code(buildjail::exec::wait))]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was terminated by a signal instead of exiting.
    #[error("{command} terminated by signal {signal}")]
    #[diagnostic(code(buildjail::exec::signaled))]
    Signaled { command: String, signal: i32 },

    /// A step of the attach-and-drop-credentials sequence failed in the child.
    #[error("in-jail execution failed during the {phase} phase")]
    #[diagnostic(
        code(buildjail::exec::phase),
        help("the child reports which setup step failed before exec")
    )]
    Phase { phase: crate::exec::Phase },

    /// The target jail has no live OS-level instance.
    #[error("jail {name} is not running")]
    #[diagnostic(code(buildjail::exec::jail_not_running))]
    JailNotRunning { name: String },

    /// Argument vector was empty or not representable as C strings.
    #[error("invalid argument vector: {reason}")]
    #[diagnostic(code(buildjail::exec::argv))]
    InvalidArgv { reason: String },

    /// Fork or pipe plumbing failed before the child ran.
    #[error("failed to set up child process: {context}")]
    #[diagnostic(code(buildjail::exec::setup))]
    ChildSetup {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the tabular property store.
#[derive(Error, Debug, Diagnostic)]
pub enum StoreError {
    /// The backing listing command failed to run.
    #[error("property listing command failed")]
    #[diagnostic(code(buildjail::store::exec))]
    Exec(#[from] ExecError),

    /// A point lookup matched no row. Non-fatal; callers decide.
    #[error("no {object_type} named {name} in the property store")]
    #[diagnostic(code(buildjail::store::not_found))]
    NotFound { object_type: String, name: String },

    /// An integer-typed column held something other than `-` or a bounded
    /// unsigned decimal.
    #[error("property {property} holds {value:?}, expected an unsigned integer")]
    #[diagnostic(
        code(buildjail::store::integer_field),
        help("integer properties accept decimal values up to i32::MAX, or `-` for unset")
    )]
    IntegerField { property: String, value: String },
}

/// Errors from directory creation and mount manipulation.
#[derive(Error, Debug, Diagnostic)]
pub enum MountError {
    /// Creating a directory component failed for a reason other than
    /// "already exists".
    #[error("failed to create directory {path}: {source}")]
    #[diagnostic(code(buildjail::mount::mkdir))]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Attaching a mount failed. Overlay-mount failures are unsafe to
    /// continue past; supporting-mount failures are logged and tolerated
    /// by the caller.
    #[error("failed to mount {fstype} at {target}: {detail}")]
    #[diagnostic(code(buildjail::mount::attach))]
    Attach {
        fstype: &'static str,
        target: String,
        detail: String,
    },

    /// Detaching a mount failed.
    #[error("failed to unmount {target}: {detail}")]
    #[diagnostic(code(buildjail::mount::detach))]
    Detach { target: String, detail: String },

    /// The host's mount table could not be read. Teardown cannot proceed
    /// without it.
    #[error("failed to read the mount table: {detail}")]
    #[diagnostic(code(buildjail::mount::table))]
    MountTable { detail: String },

    /// The operation needs FreeBSD mount syscalls.
    #[error("mount operations require FreeBSD")]
    #[diagnostic(code(buildjail::mount::unsupported))]
    Unsupported,
}

/// Errors from jail lifecycle transitions.
#[derive(Error, Debug, Diagnostic)]
pub enum JailError {
    /// A required filesystem kernel module could not be loaded.
    #[error("failed to load kernel module {module}: {detail}")]
    #[diagnostic(
        code(buildjail::jail::module),
        help("the jail needs this filesystem available before it can start")
    )]
    ModuleLoad { module: &'static str, detail: String },

    /// The OS-level jail could not be created. Supporting mounts attached
    /// before the attempt are left in place.
    #[error("failed to create jail {name}: {detail}")]
    #[diagnostic(code(buildjail::jail::create))]
    Create { name: String, detail: String },

    /// The jail name is not present in the ownership tree.
    #[error("jail {name} is not registered in the jail tree")]
    #[diagnostic(code(buildjail::jail::unknown))]
    Unknown { name: String },

    /// A jail with this name is already present in the ownership tree.
    #[error("jail {name} is already registered in the jail tree")]
    #[diagnostic(code(buildjail::jail::already_registered))]
    AlreadyRegistered { name: String },

    /// The backing dataset could not be rolled back to its clean snapshot.
    /// The sandbox storage is in an unknown state and must not be reused.
    #[error("failed to roll back dataset to {snapshot}")]
    #[diagnostic(
        code(buildjail::jail::rollback),
        help("every jail dataset must carry a snapshot named <dataset>@clean")
    )]
    Rollback { snapshot: String },

    /// Descendant-mount teardown failed.
    #[error("mount teardown for jail {name} failed")]
    #[diagnostic(code(buildjail::jail::teardown))]
    Teardown {
        name: String,
        #[source]
        source: MountError,
    },

    /// The operation needs the FreeBSD jail(2) facility.
    #[error("jail operations require FreeBSD")]
    #[diagnostic(code(buildjail::jail::unsupported))]
    Unsupported,
}

/// Errors from propagating host configuration into a jail tree.
#[derive(Error, Debug, Diagnostic)]
pub enum SetupError {
    /// Reading a source fragment or appending to the destination failed.
    #[error("{context}: {source}")]
    #[diagnostic(code(buildjail::setup::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
