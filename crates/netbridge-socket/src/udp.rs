use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, error, info};

use crate::error::{Result, SocketError};
use crate::traits::{Socket, SocketRole};

/// UDP socket used by the network transport.
///
/// The endpoint always binds `local`. Opened as [`SocketRole::Sender`] it is
/// additionally connected to `remote`, which enables [`Socket::send`] and
/// filters inbound datagrams in the kernel. The transport opens it as a
/// listener and addresses every packet explicitly with [`UdpEndpoint::send_to`].
#[derive(Debug)]
pub struct UdpEndpoint {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    socket: Option<UdpSocket>,
}

impl UdpEndpoint {
    /// Create a closed endpoint.
    pub fn new(local: SocketAddr, remote: Option<SocketAddr>) -> Self {
        Self {
            local,
            remote,
            socket: None,
        }
    }

    /// Bind `local` and open as a listener in one step.
    pub fn bind(local: SocketAddr) -> Result<Self> {
        let mut endpoint = Self::new(local, None);
        endpoint.open(SocketRole::Listener)?;
        Ok(endpoint)
    }

    /// Send one datagram to `addr`.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(SocketError::Closed)?;
        let written = socket.send_to(buf, addr)?;
        check_full_write(written, buf.len())
    }

    /// Receive one datagram together with its source address.
    pub fn receive_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let socket = self.socket.as_ref().ok_or(SocketError::Closed)?;
        match socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(err) if is_no_data(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The actual bound address (resolves an ephemeral port), if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// The configured remote address.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn try_open(&self, role: SocketRole) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(self.local).map_err(|e| SocketError::Bind {
            addr: self.local.to_string(),
            source: e,
        })?;

        if role == SocketRole::Sender {
            let remote = self.remote.ok_or(SocketError::NoRemote)?;
            socket.connect(remote).map_err(|e| SocketError::Connect {
                addr: remote.to_string(),
                source: e,
            })?;
        }

        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

impl Socket for UdpEndpoint {
    fn open(&mut self, role: SocketRole) -> Result<()> {
        self.close();
        match self.try_open(role) {
            Ok(socket) => {
                info!(local = ?socket.local_addr().ok(), ?role, "udp socket open");
                self.socket = Some(socket);
                Ok(())
            }
            Err(err) => {
                error!(local = %self.local, ?role, error = %err, "failed to open udp socket");
                Err(err)
            }
        }
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(SocketError::Closed)?;
        let written = socket.send(buf)?;
        check_full_write(written, buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(self.receive_from(buf)?.map(|(n, _)| n))
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(local = %self.local, "udp socket closed");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}

pub(crate) fn check_full_write(written: usize, expected: usize) -> Result<()> {
    if written != expected {
        return Err(SocketError::PartialWrite { written, expected });
    }
    Ok(())
}

pub(crate) fn is_no_data(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::traits::poll_readable;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn send_to_and_receive_from() {
        let a = UdpEndpoint::bind(loopback()).unwrap();
        let b = UdpEndpoint::bind(loopback()).unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"hello", b_addr).unwrap();
        assert!(poll_readable(b.raw_fd().unwrap(), Duration::from_secs(1)).unwrap());

        let mut buf = [0u8; 64];
        let (n, from) = b.receive_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn receive_without_data_is_none() {
        let a = UdpEndpoint::bind(loopback()).unwrap();
        let mut buf = [0u8; 16];
        assert!(a.receive(&mut buf).unwrap().is_none());
    }

    #[test]
    fn connected_sender_uses_send() {
        let listener = UdpEndpoint::bind(loopback()).unwrap();
        let mut sender = UdpEndpoint::new(loopback(), listener.local_addr());
        sender.open(SocketRole::Sender).unwrap();

        sender.send(b"ping").unwrap();
        assert!(poll_readable(listener.raw_fd().unwrap(), Duration::from_secs(1)).unwrap());
        let mut buf = [0u8; 16];
        let n = listener.receive(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn sender_without_remote_fails_closed() {
        let mut sender = UdpEndpoint::new(loopback(), None);
        let err = sender.open(SocketRole::Sender).unwrap_err();
        assert!(matches!(err, SocketError::NoRemote));
        assert!(!sender.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let mut a = UdpEndpoint::bind(loopback()).unwrap();
        a.close();
        a.close();
        assert!(!a.is_open());
        assert!(a.raw_fd().is_none());
        assert!(matches!(a.send_to(b"x", loopback()), Err(SocketError::Closed)));
    }
}
