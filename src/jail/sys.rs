//! Thin wrappers over the FreeBSD jail(2) and kld(2) facilities.
//!
//! Parameters for jail creation travel as name/value iovec pairs, the same
//! shape the kernel interface expects for nmount(2). On non-FreeBSD hosts
//! every operation reports `Unsupported` (lookups report "no such jail"),
//! which keeps the portable lifecycle logic compiling and testable.

#![allow(unsafe_code)]

use std::io;
use std::path::Path;

use super::NetworkMode;

#[cfg(target_os = "freebsd")]
mod freebsd {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use crate::jail::NetworkMode;

    /// sys/jail.h: create a new jail rather than updating one.
    const JAIL_CREATE: libc::c_int = 0x01;
    /// Address-family behavior: inherit the host's network configuration.
    const JAIL_SYS_INHERIT: libc::c_int = 2;

    /// Typed jail parameter values, kept alive until the syscall is issued.
    enum ParamValue {
        Str(CString),
        Int(libc::c_int),
        Addr4(libc::in_addr),
        Addr6(libc::in6_addr),
        /// Present-with-no-value parameters such as `persist`.
        Flag,
    }

    /// Name/value parameter list for jail_set(2).
    struct JailParams {
        names: Vec<CString>,
        values: Vec<ParamValue>,
    }

    impl JailParams {
        fn new() -> Self {
            Self {
                names: Vec::new(),
                values: Vec::new(),
            }
        }

        fn push(&mut self, name: &str, value: ParamValue) -> io::Result<()> {
            let name = CString::new(name)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in parameter"))?;
            self.names.push(name);
            self.values.push(value);
            Ok(())
        }

        fn string(&mut self, name: &str, value: &str) -> io::Result<()> {
            let value = CString::new(value)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in value"))?;
            self.push(name, ParamValue::Str(value))
        }

        fn int(&mut self, name: &str, value: libc::c_int) -> io::Result<()> {
            self.push(name, ParamValue::Int(value))
        }

        fn flag(&mut self, name: &str) -> io::Result<()> {
            self.push(name, ParamValue::Flag)
        }

        fn addr4(&mut self, name: &str, addr: libc::in_addr) -> io::Result<()> {
            self.push(name, ParamValue::Addr4(addr))
        }

        fn addr6(&mut self, name: &str, addr: libc::in6_addr) -> io::Result<()> {
            self.push(name, ParamValue::Addr6(addr))
        }

        /// Issues jail_set(2) with the accumulated parameters, returning
        /// the new jail's ID.
        fn set(&self, flags: libc::c_int) -> io::Result<i32> {
            let mut iov = Vec::with_capacity(self.names.len() * 2);
            for (name, value) in self.names.iter().zip(&self.values) {
                iov.push(libc::iovec {
                    iov_base: name.as_ptr() as *mut libc::c_void,
                    iov_len: name.to_bytes_with_nul().len(),
                });
                iov.push(match value {
                    ParamValue::Str(s) => libc::iovec {
                        iov_base: s.as_ptr() as *mut libc::c_void,
                        iov_len: s.to_bytes_with_nul().len(),
                    },
                    ParamValue::Int(n) => libc::iovec {
                        iov_base: n as *const libc::c_int as *mut libc::c_void,
                        iov_len: std::mem::size_of::<libc::c_int>(),
                    },
                    ParamValue::Addr4(a) => libc::iovec {
                        iov_base: a as *const libc::in_addr as *mut libc::c_void,
                        iov_len: std::mem::size_of::<libc::in_addr>(),
                    },
                    ParamValue::Addr6(a) => libc::iovec {
                        iov_base: a as *const libc::in6_addr as *mut libc::c_void,
                        iov_len: std::mem::size_of::<libc::in6_addr>(),
                    },
                    ParamValue::Flag => libc::iovec {
                        iov_base: std::ptr::null_mut(),
                        iov_len: 0,
                    },
                });
            }

            // SAFETY: every iovec points into values owned by self, which
            // outlive the call; the kernel reads them only for its duration.
            let jid = unsafe { libc::jail_set(iov.as_mut_ptr(), iov.len() as libc::c_uint, flags) };
            if jid < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(jid)
        }
    }

    pub(super) fn jail_id(name: &str) -> Option<i32> {
        let name = CString::new(name).ok()?;
        let key = c"name";
        let errmsg_key = c"errmsg";
        let mut errmsg = [0u8; 256];

        let mut iov = [
            libc::iovec {
                iov_base: key.as_ptr() as *mut libc::c_void,
                iov_len: key.to_bytes_with_nul().len(),
            },
            libc::iovec {
                iov_base: name.as_ptr() as *mut libc::c_void,
                iov_len: name.to_bytes_with_nul().len(),
            },
            libc::iovec {
                iov_base: errmsg_key.as_ptr() as *mut libc::c_void,
                iov_len: errmsg_key.to_bytes_with_nul().len(),
            },
            libc::iovec {
                iov_base: errmsg.as_mut_ptr() as *mut libc::c_void,
                iov_len: errmsg.len(),
            },
        ];

        // SAFETY: the iovecs reference locals that outlive the call.
        let jid = unsafe { libc::jail_get(iov.as_mut_ptr(), iov.len() as libc::c_uint, 0) };
        (jid >= 0).then_some(jid)
    }

    pub(super) fn attach(jid: i32) -> io::Result<()> {
        // SAFETY: plain syscall on an integer jail ID.
        if unsafe { libc::jail_attach(jid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn remove(jid: i32) -> io::Result<()> {
        // SAFETY: plain syscall on an integer jail ID.
        if unsafe { libc::jail_remove(jid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn create(name: &str, mountpoint: &Path, mode: NetworkMode) -> io::Result<i32> {
        let mut params = JailParams::new();
        params.string("name", name)?;
        params.string("host.hostname", name)?;
        params.string(
            "path",
            std::str::from_utf8(mountpoint.as_os_str().as_bytes())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "non-UTF-8 mountpoint"))?,
        )?;
        params.flag("persist")?;
        // Capability grants build tooling needs inside the jail.
        params.int("allow.sysvipc", 1)?;
        params.int("allow.mount", 1)?;
        params.int("allow.socket_af", 1)?;
        params.int("allow.raw_sockets", 1)?;
        params.int("allow.chflags", 1)?;

        match mode {
            NetworkMode::InheritHost => {
                params.int("ip4", JAIL_SYS_INHERIT)?;
                params.int("ip6", JAIL_SYS_INHERIT)?;
            }
            NetworkMode::Isolated => {
                let loopback4 = libc::in_addr {
                    s_addr: u32::from(std::net::Ipv4Addr::LOCALHOST).to_be(),
                };
                // SAFETY: all-zero bytes are a valid in6_addr.
                let mut loopback6: libc::in6_addr = unsafe { std::mem::zeroed() };
                loopback6.s6_addr[15] = 1;
                params.addr4("ip4.addr", loopback4)?;
                params.addr6("ip6.addr", loopback6)?;
            }
        }

        params.set(JAIL_CREATE)
    }

    pub(super) fn load_module(name: &str) -> io::Result<()> {
        let name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in module name"))?;
        // SAFETY: kldload reads a NUL-terminated module name.
        if unsafe { libc::kldload(name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            // Already loaded, or compiled into the kernel.
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(not(target_os = "freebsd"))]
fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "jail facilities require FreeBSD")
}

/// Resolves a jail name to its live OS-level ID, if any.
pub(crate) fn jail_id(name: &str) -> Option<i32> {
    #[cfg(target_os = "freebsd")]
    {
        freebsd::jail_id(name)
    }
    #[cfg(not(target_os = "freebsd"))]
    {
        let _ = name;
        None
    }
}

/// Attaches the calling process to a running jail.
pub(crate) fn attach(jid: i32) -> io::Result<()> {
    #[cfg(target_os = "freebsd")]
    {
        freebsd::attach(jid)
    }
    #[cfg(not(target_os = "freebsd"))]
    {
        let _ = jid;
        Err(unsupported())
    }
}

/// Removes a jail's OS-level instance.
pub(crate) fn remove(jid: i32) -> io::Result<()> {
    #[cfg(target_os = "freebsd")]
    {
        freebsd::remove(jid)
    }
    #[cfg(not(target_os = "freebsd"))]
    {
        let _ = jid;
        Err(unsupported())
    }
}

/// Creates a persistent jail rooted at `mountpoint` and returns its ID.
pub(crate) fn create(name: &str, mountpoint: &Path, mode: NetworkMode) -> io::Result<i32> {
    #[cfg(target_os = "freebsd")]
    {
        freebsd::create(name, mountpoint, mode)
    }
    #[cfg(not(target_os = "freebsd"))]
    {
        let _ = (name, mountpoint, mode);
        Err(unsupported())
    }
}

/// Ensures a filesystem kernel module is available, loading it if needed.
pub(crate) fn load_module(name: &str) -> io::Result<()> {
    #[cfg(target_os = "freebsd")]
    {
        freebsd::load_module(name)
    }
    #[cfg(not(target_os = "freebsd"))]
    {
        let _ = name;
        Err(unsupported())
    }
}
