use std::fs;
use std::io;
use std::path::Path;

use netbridge_relay::RelayConfig;
use netbridge_transport::TransportConfig;
use serde::{Deserialize, Serialize};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};

/// Settings read from `--config`. Missing sections and fields keep their
/// defaults; durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub transport: TransportConfig,
    pub relay: RelayConfig,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let context = format!("failed reading {}", path.display());
        let text = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CliError::new(USAGE, format!("{context}: {err}")),
            _ => io_error(&context, err),
        })?;
        Self::parse(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("{}: {err}", path.display())))
    }

    fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn no_file_means_defaults() {
        let config = CliConfig::load(None).expect("defaults should load");
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = CliConfig::parse(
            r#"{
                "transport": { "retransmit_after": 75, "keepalive_interval": 1000 },
                "relay": { "dir": "/run/netbridge" }
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.transport.retransmit_after, Duration::from_millis(75));
        assert_eq!(
            config.transport.keepalive_interval,
            Some(Duration::from_secs(1))
        );
        assert_eq!(config.transport.max_resends, TransportConfig::default().max_resends);
        assert_eq!(config.relay.dir, Path::new("/run/netbridge"));
        assert_eq!(config.relay.base_name, RelayConfig::default().base_name);
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(CliConfig::parse(r#"{ "transprot": {} }"#).is_err());
    }

    #[test]
    fn missing_file_maps_to_exit_code() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/netbridge.json")))
            .expect_err("missing file should fail");
        assert_eq!(err.code, USAGE);
    }
}
