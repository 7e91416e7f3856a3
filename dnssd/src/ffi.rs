//! Utilities related to FFI bindings

use crate::{Error, Result};
use libc::{c_char, c_int};
use std::ffi::{CStr, CString};
use std::io;
use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// `getservbyport()` returns a pointer into static storage.
static SERVENT_LOCK: Mutex<()> = Mutex::new(());

/// Performs a unix `poll()` for readability on every descriptor in `fds` with the specified
/// `timeout`. Returns one readiness flag per descriptor; hang-ups and errors count as readable
/// so that the following read reports them. An interrupted call is retried with the time left.
pub fn poll_readable(fds: &[RawFd], timeout: Duration) -> Result<Vec<bool>> {
    let mut poll_fds = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect::<Vec<_>>();

    let deadline = Instant::now().checked_add(timeout);

    loop {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => timeout,
        };
        let timeout_ms = remaining
            .as_nanos()
            .div_ceil(1_000_000)
            .min(c_int::MAX as u128) as c_int;

        let result = unsafe {
            libc::poll(
                poll_fds.as_mut_ptr(),
                poll_fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if result >= 0 {
            break;
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::SystemError {
                code: err.raw_os_error().unwrap_or(result),
                message: format!("poll(): returned error status: {err}"),
            });
        }

        trace!("poll() interrupted, {remaining:?} left");
    }

    Ok(poll_fds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .collect())
}

/// Wraps `if_nametoindex()`; a zero result means no such interface.
pub fn if_nametoindex(name: &str) -> Option<u32> {
    let name = CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    (index != 0).then_some(index)
}

/// Wraps `if_indextoname()`.
pub fn if_indextoname(index: u32) -> Option<String> {
    let mut buf = [0 as c_char; libc::IF_NAMESIZE];
    let name = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };

    if name.is_null() {
        None
    } else {
        Some(unsafe { copy_raw(buf.as_ptr()) })
    }
}

/// Wraps `getservbyport()`. `port` is in host byte order.
pub fn getservbyport(port: u16, protocol: Option<&str>) -> Option<String> {
    let protocol = match protocol {
        Some(p) => Some(CString::new(p).ok()?),
        None => None,
    };
    let protocol_ptr = protocol.as_ref().map_or(std::ptr::null(), |p| p.as_ptr());

    let _guard = SERVENT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    let entry = unsafe { libc::getservbyport(c_int::from(port.to_be()), protocol_ptr) };
    if entry.is_null() {
        return None;
    }

    let name = unsafe { (*entry).s_name };
    if name.is_null() {
        None
    } else {
        Some(unsafe { copy_raw(name) })
    }
}

/// Copies the specified NUL-terminated `*const c_char` into a `String`, replacing invalid UTF-8.
///
/// # Safety
/// `s` must be non-null and point to a NUL-terminated string.
unsafe fn copy_raw(s: *const c_char) -> String {
    unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
}
