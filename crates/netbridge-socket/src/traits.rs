use std::time::Duration;

use crate::error::Result;

/// Which side of a datagram exchange a socket plays when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    /// Bind the local address and receive on it.
    Listener,
    /// Connect to the remote address and send to it.
    Sender,
}

/// A non-blocking datagram socket owning exactly one descriptor.
///
/// Implementations start closed. `open` either leaves the socket fully open
/// or, on any failure, closed with the error logged and returned.
pub trait Socket {
    /// Create the descriptor, bind or connect according to `role`, and
    /// switch it to non-blocking mode.
    fn open(&mut self, role: SocketRole) -> Result<()>;

    /// Send one datagram to the connected peer.
    ///
    /// Succeeds only if the kernel accepted every byte.
    fn send(&self, buf: &[u8]) -> Result<()>;

    /// Receive one datagram. `Ok(None)` means no data is waiting.
    fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Release the descriptor (and any filesystem path). Idempotent.
    fn close(&mut self);

    /// Whether the socket currently owns a descriptor.
    fn is_open(&self) -> bool;

    /// The descriptor to poll for readiness, if open.
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd>;
}

/// Wait up to `timeout` for `fd` to become readable.
///
/// Returns `Ok(false)` on timeout or when the wait was interrupted by a
/// signal, so callers can re-check their shutdown flag and poll again.
#[cfg(unix)]
pub fn poll_readable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of exactly one.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err.into());
    }

    Ok(rc > 0 && (pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP)) != 0)
}
