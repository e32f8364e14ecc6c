use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Crates whose events `--log-level` governs; everything else stays at `warn`.
const NETBRIDGE_TARGETS: [&str; 5] = [
    "netbridge",
    "netbridge_socket",
    "netbridge_frame",
    "netbridge_transport",
    "netbridge_relay",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Filter directives for `level`, scoped to the netbridge crates.
fn directives(level: LogLevel) -> String {
    let level = level
        .to_possible_value()
        .map(|value| value.get_name().to_owned())
        .unwrap_or_else(|| "info".to_owned());
    let mut out = String::from("warn");
    for target in NETBRIDGE_TARGETS {
        out.push_str(&format!(",{target}={level}"));
    }
    out
}

/// A parseable `RUST_LOG` wins over `--log-level`/`NETBRIDGE_LOG_LEVEL`.
fn build_filter(rust_log: Option<&str>, level: LogLevel) -> EnvFilter {
    rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(directives(level)))
}

/// Install the stderr subscriber. Worker thread names (`netbridge-send`,
/// `netbridge-relay-primary`, ...) are included so per-worker events can be
/// told apart.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(rust_log.as_deref(), level))
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_scopes_every_netbridge_crate() {
        let spec = directives(LogLevel::Debug);
        assert!(spec.starts_with("warn,"));
        for target in NETBRIDGE_TARGETS {
            assert!(spec.contains(&format!("{target}=debug")), "{spec}");
        }
        assert!(EnvFilter::try_new(&spec).is_ok());
    }

    #[test]
    fn rust_log_overrides_level() {
        let filter = build_filter(Some("netbridge_relay=trace"), LogLevel::Error).to_string();
        assert!(filter.contains("netbridge_relay=trace"), "{filter}");
        assert!(!filter.contains("netbridge_transport"), "{filter}");
    }

    #[test]
    fn unusable_rust_log_falls_back_to_level() {
        for spec in [None, Some(""), Some("   "), Some("netbridge=[[")] {
            let filter = build_filter(spec, LogLevel::Warn).to_string();
            assert!(filter.contains("netbridge_transport=warn"), "{spec:?} -> {filter}");
        }
    }
}
