use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::{Result, SocketError};
use crate::traits::{Socket, SocketRole};
use crate::udp::{check_full_write, is_no_data};

/// Unix datagram socket tied to a filesystem path.
///
/// Opened as a [`SocketRole::Listener`] it binds `path` and receives on it;
/// the path is removed again on close. Opened as a [`SocketRole::Sender`] it
/// is an unbound socket connected to `path`.
#[derive(Debug)]
pub struct RelaySocket {
    path: PathBuf,
    mode: u32,
    socket: Option<UnixDatagram>,
    role: Option<SocketRole>,
    created_inode: Option<(u64, u64)>,
}

impl RelaySocket {
    /// Default permission mode for bound socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Create a closed socket for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Create a closed socket for `path` with an explicit bind mode.
    pub fn with_mode(path: impl AsRef<Path>, mode: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode,
            socket: None,
            role: None,
            created_inode: None,
        }
    }

    /// The path this socket binds or connects to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The role the socket was opened with, if open.
    pub fn role(&self) -> Option<SocketRole> {
        self.role
    }

    fn check_path_len(&self) -> Result<()> {
        let len = self.path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(SocketError::PathTooLong {
                path: self.path.clone(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(())
    }

    fn bind_error(&self, source: std::io::Error) -> SocketError {
        SocketError::Bind {
            addr: self.path.display().to_string(),
            source,
        }
    }

    fn try_bind(&mut self) -> Result<UnixDatagram> {
        // Remove a stale socket left by a previous run, but never a non-socket file.
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() {
                debug!(path = ?self.path, "removing stale socket");
                std::fs::remove_file(&self.path).map_err(|e| self.bind_error(e))?;
            } else {
                return Err(self.bind_error(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let socket = UnixDatagram::bind(&self.path).map_err(|e| self.bind_error(e))?;

        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(self.mode))
            .map_err(|e| self.bind_error(e))?;
        let metadata = std::fs::symlink_metadata(&self.path).map_err(|e| self.bind_error(e))?;
        self.created_inode = Some((metadata.dev(), metadata.ino()));

        Ok(socket)
    }

    fn try_connect(&self) -> Result<UnixDatagram> {
        let socket = UnixDatagram::unbound()?;
        socket
            .connect(&self.path)
            .map_err(|e| SocketError::Connect {
                addr: self.path.display().to_string(),
                source: e,
            })?;
        Ok(socket)
    }

    fn unlink_bound_path(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode.take() else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

impl Socket for RelaySocket {
    fn open(&mut self, role: SocketRole) -> Result<()> {
        self.close();

        let opened = self.check_path_len().and_then(|()| {
            let socket = match role {
                SocketRole::Listener => self.try_bind()?,
                SocketRole::Sender => self.try_connect()?,
            };
            socket.set_nonblocking(true)?;
            Ok(socket)
        });

        match opened {
            Ok(socket) => {
                info!(path = ?self.path, ?role, "relay socket open");
                self.socket = Some(socket);
                self.role = Some(role);
                Ok(())
            }
            Err(err) => {
                // A bind that got as far as creating the path must not leave it behind.
                self.unlink_bound_path();
                match &err {
                    // A missing peer path is routine while the other process starts up.
                    SocketError::Connect { .. } => {
                        debug!(path = ?self.path, error = %err, "relay peer not reachable")
                    }
                    _ => error!(path = ?self.path, ?role, error = %err, "failed to open relay socket"),
                }
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
        let socket = self.socket.as_ref().ok_or(SocketError::Closed)?;
        match socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if is_no_data(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(path = ?self.path, role = ?self.role, "relay socket closed");
        }
        self.role = None;
        self.unlink_bound_path();
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}

impl Drop for RelaySocket {
    fn drop(&mut self) {
        self.close();
    }
}
