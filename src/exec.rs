//! External command execution: host-side capture, fork/exec/wait, and the
//! attach-to-jail privileged executor.
//!
//! All execution here is synchronous and blocking. A capture call holds the
//! caller for the command's full runtime; there is no timeout and no
//! cancellation path, so a wedged external command wedges the lifecycle
//! sequence that issued it.
//!
//! # Capture semantics
//!
//! `capture` reads the child's entire stdout and returns it verbatim. The
//! child's exit status is not inspected: a command that fails loudly on
//! stderr but prints rows is treated the same as one that succeeds. Failure
//! to spawn and a successful-but-silent run are reported as distinct errors
//! (`ExecError::Spawn` vs `ExecError::EmptyOutput`) so callers can tell a
//! missing binary from an empty result set.
//!
//! # In-jail execution
//!
//! `run_in_jail` forks, attaches the child to a running jail, drops to the
//! fixed build identity, and execs the requested command. Each step of that
//! sequence is a [`Phase`]; when one fails, the child reports the phase back
//! to the parent over a close-on-exec pipe before exiting, so the caller
//! sees which step broke instead of an opaque exit code.

use std::ffi::CString;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, execvp, fork, initgroups, pipe2, setgid, setuid, ForkResult, User};
use tracing::{debug, instrument, trace};

use crate::error::ExecError;
use crate::jail::sys;

/// Fixed unprivileged identity build steps run as inside a jail.
const BUILD_USER: &str = "nobody";

/// Path of the jail-exec utility used for in-jail output capture.
const JEXEC_COMMAND: &str = "/usr/sbin/jexec";

/// Steps of the fork/attach/drop-credentials/exec sequence, in order.
///
/// The child reports the first failing step to the parent; a successful
/// `execvp` closes the reporting pipe and no phase is ever seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Attaching the child to the jail's namespace.
    Attach = 1,
    /// Changing the working directory to the jail root.
    Chdir = 2,
    /// Resolving the fixed build identity.
    Identity = 3,
    /// Applying the identity's supplementary groups.
    Groups = 4,
    /// Setting the primary group. Always before the UID drop.
    SetGid = 5,
    /// Dropping to the unprivileged UID.
    SetUid = 6,
    /// Replacing the child image with the requested command.
    Exec = 7,
}

impl Phase {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Attach),
            2 => Some(Self::Chdir),
            3 => Some(Self::Identity),
            4 => Some(Self::Groups),
            5 => Some(Self::SetGid),
            6 => Some(Self::SetUid),
            7 => Some(Self::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Attach => "attach",
            Self::Chdir => "chdir",
            Self::Identity => "identity",
            Self::Groups => "groups",
            Self::SetGid => "setgid",
            Self::SetUid => "setuid",
            Self::Exec => "exec",
        };
        write!(f, "{name}")
    }
}

/// Spawns a command and returns its entire stdout verbatim.
///
/// Blocks until the child closes stdout. stderr passes through to the
/// caller's stderr; the exit status is not inspected.
///
/// # Errors
///
/// - `ExecError::Spawn` if the command cannot be started
/// - `ExecError::EmptyOutput` if it wrote zero bytes to stdout
pub fn capture(program: &Path, args: &[&str]) -> Result<String, ExecError> {
    let command = program.display().to_string();
    trace!(%command, ?args, "capturing command output");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| ExecError::Spawn {
            command: command.clone(),
            source,
        })?;

    if output.stdout.is_empty() {
        return Err(ExecError::EmptyOutput { command });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs a command to completion and returns its exit status.
///
/// stdin/stdout/stderr are inherited from the caller.
///
/// # Errors
///
/// - `ExecError::Spawn` if the command cannot be started
/// - `ExecError::Signaled` if the child died to a signal instead of exiting
pub fn run(program: &Path, args: &[&str]) -> Result<i32, ExecError> {
    use std::os::unix::process::ExitStatusExt;

    let command = program.display().to_string();
    debug!(%command, ?args, "running command");

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| ExecError::Spawn {
            command: command.clone(),
            source,
        })?;

    match status.code() {
        Some(code) => Ok(code),
        None => Err(ExecError::Signaled {
            command,
            signal: status.signal().unwrap_or_default(),
        }),
    }
}

/// Captures the stdout of a command run inside a running jail.
///
/// Shells out to the system jail-exec utility as the jail's superuser, with
/// [`capture`]'s semantics (full-stdout read, exit status ignored).
pub fn capture_in_jail(jail_name: &str, argv: &[&str]) -> Result<String, ExecError> {
    let mut args = vec!["-U", "root", jail_name];
    args.extend_from_slice(argv);
    capture(Path::new(JEXEC_COMMAND), &args)
}

/// Executes a command inside a running jail as the fixed build identity and
/// returns its exit status.
///
/// Resolves the jail's OS-level identifier, forks, and in the child:
/// attaches to the jail, changes directory to its root, resolves the build
/// user, applies its group memberships and primary group, drops the UID,
/// then execs `argv`. The parent blocks until the child terminates.
///
/// # Errors
///
/// - `ExecError::JailNotRunning` if the jail has no live instance
/// - `ExecError::Phase` naming the failing setup step in the child
/// - `ExecError::Signaled` / `ExecError::Wait` for supervision failures
#[instrument(skip_all, fields(jail = %jail_name))]
pub fn run_in_jail(jail_name: &str, argv: &[&str]) -> Result<i32, ExecError> {
    let jid = sys::jail_id(jail_name).ok_or_else(|| ExecError::JailNotRunning {
        name: jail_name.to_string(),
    })?;

    if argv.is_empty() {
        return Err(ExecError::InvalidArgv {
            reason: "empty command".to_string(),
        });
    }

    let command = argv.join(" ");

    // Build the C argv before forking; the child only execs or reports.
    let argv_c = argv
        .iter()
        .map(|arg| CString::new(*arg))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ExecError::InvalidArgv {
            reason: "argument contains an interior NUL byte".to_string(),
        })?;

    // Phase reports travel over this pipe; O_CLOEXEC closes the write end
    // on a successful exec, which the parent observes as EOF.
    let (report_rx, report_tx) =
        pipe2(OFlag::O_CLOEXEC).map_err(|errno| ExecError::ChildSetup {
            context: "failed to create phase-report pipe".to_string(),
            source: std::io::Error::from(errno),
        })?;

    debug!(jid, %command, "spawning in-jail command");

    // SAFETY: the child restricts itself to attach/chdir/credential
    // syscalls, a single pipe write, and exec or _exit.
    match unsafe { fork() } {
        Err(errno) => Err(ExecError::ChildSetup {
            context: "fork failed".to_string(),
            source: std::io::Error::from(errno),
        }),
        Ok(ForkResult::Child) => {
            drop(report_rx);
            let phase = attach_and_exec(jid, &argv_c);
            let _ = nix::unistd::write(&report_tx, &[phase as u8]);
            // SAFETY: plain process exit without running parent-owned
            // destructors or atexit handlers.
            unsafe { libc::_exit(127) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(report_tx);

            let mut report = Vec::new();
            let _ = std::fs::File::from(report_rx).read_to_end(&mut report);

            let status = loop {
                match waitpid(child, None) {
                    Err(Errno::EINTR) => continue,
                    Err(errno) => {
                        return Err(ExecError::Wait {
                            command,
                            source: std::io::Error::from(errno),
                        })
                    }
                    Ok(status) => break status,
                }
            };

            if let Some(&byte) = report.first() {
                let phase = Phase::from_byte(byte).unwrap_or(Phase::Exec);
                return Err(ExecError::Phase { phase });
            }

            match status {
                WaitStatus::Exited(_, code) => {
                    debug!(exit_code = code, "in-jail command completed");
                    Ok(code)
                }
                WaitStatus::Signaled(_, signal, _) => Err(ExecError::Signaled {
                    command,
                    signal: signal as i32,
                }),
                other => Err(ExecError::Wait {
                    command,
                    source: std::io::Error::other(format!("unexpected wait status: {other:?}")),
                }),
            }
        }
    }
}

/// Child-side setup sequence. Only returns when a step fails, naming it;
/// on success `execvp` replaces the process image.
fn attach_and_exec(jid: i32, argv: &[CString]) -> Phase {
    if sys::attach(jid).is_err() {
        return Phase::Attach;
    }
    if chdir("/").is_err() {
        return Phase::Chdir;
    }
    let user = match User::from_name(BUILD_USER) {
        Ok(Some(user)) => user,
        _ => return Phase::Identity,
    };
    let user_c = match CString::new(user.name.as_str()) {
        Ok(name) => name,
        Err(_) => return Phase::Identity,
    };
    if initgroups(&user_c, user.gid).is_err() {
        return Phase::Groups;
    }
    // GID before UID: once the UID is dropped the group change is no
    // longer permitted.
    if setgid(user.gid).is_err() {
        return Phase::SetGid;
    }
    if setuid(user.uid).is_err() {
        return Phase::SetUid;
    }
    let _ = execvp(&argv[0], argv);
    Phase::Exec
}
