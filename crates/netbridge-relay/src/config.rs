use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Directory relay sockets live in unless configured otherwise.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Suffix of the socket the Primary binds.
pub const PRIMARY_SUFFIX: char = 'A';

/// Suffix of the socket the Secondary binds.
pub const SECONDARY_SUFFIX: char = 'B';

/// The two fixed ends of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayRole {
    /// Owns the network side; binds `<base>A`, writes to `<base>B`.
    Primary,
    /// Binds `<base>B`, writes to `<base>A`.
    Secondary,
}

impl RelayRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn peer(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    fn suffix(self) -> char {
        match self {
            Self::Primary => PRIMARY_SUFFIX,
            Self::Secondary => SECONDARY_SUFFIX,
        }
    }
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown relay role: {other}")),
        }
    }
}

/// Settings for one [`ProcessRelay`](crate::ProcessRelay) endpoint.
///
/// Durations serialize as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Directory holding both sockets.
    pub dir: PathBuf,
    /// Shared base name; the sockets are `<dir>/<base_name>A` and `...B`.
    pub base_name: String,
    /// Longest the poll worker waits before re-checking for shutdown.
    #[serde(with = "netbridge_frame::millis")]
    pub poll_timeout: Duration,
    /// Primary only: send KEEP_ALIVE at this interval while paired.
    #[serde(with = "netbridge_frame::millis::option")]
    pub keepalive_interval: Option<Duration>,
    /// Primary only: tear down the write side after this long without
    /// hearing a KEEP_ALIVE.
    #[serde(with = "netbridge_frame::millis::option")]
    pub peer_timeout: Option<Duration>,
    /// Bound on joining the poll worker during shutdown.
    #[serde(with = "netbridge_frame::millis")]
    pub shutdown_timeout: Duration,
    /// Permission bits of the bound socket file.
    pub socket_mode: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            base_name: "netbridge".to_string(),
            poll_timeout: Duration::from_millis(50),
            keepalive_interval: Some(Duration::from_secs(1)),
            peer_timeout: Some(Duration::from_secs(5)),
            shutdown_timeout: Duration::from_secs(2),
            socket_mode: 0o600,
        }
    }
}

impl RelayConfig {
    /// Default settings for `base_name` in the default directory.
    pub fn named(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            ..Self::default()
        }
    }

    /// Path of the socket bound by `role`.
    pub fn socket_path(&self, role: RelayRole) -> PathBuf {
        self.dir.join(format!("{}{}", self.base_name, role.suffix()))
    }

    /// Path `role` reads from.
    pub fn read_path(&self, role: RelayRole) -> PathBuf {
        self.socket_path(role)
    }

    /// Path `role` writes to.
    pub fn write_path(&self, role: RelayRole) -> PathBuf {
        self.socket_path(role.peer())
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.base_name;
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(RelayError::InvalidName(name.clone()));
        }
        Ok(())
    }
}
