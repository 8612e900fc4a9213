//! Logging setup
//!
//! Installs one global tracing subscriber per process. The filter line
//! quiets dependencies to `warn` and applies the configured level to this
//! crate only; a `RUST_LOG` value always wins over configuration. Output
//! is compact human-readable lines by default; batch scenario runs can set
//! `MNEMO_LOG_FORMAT=json` for structured output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Read `MNEMO_LOG_FORMAT`; anything but "json" means compact.
    pub fn from_env() -> Self {
        parse_format(std::env::var("MNEMO_LOG_FORMAT").ok().as_deref())
    }
}

fn parse_format(raw: Option<&str>) -> LogFormat {
    match raw {
        Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Compact,
    }
}

/// Install the global subscriber with the given crate-level log level.
/// Calling this again after a subscriber is installed is a no-op, so the
/// scenario runner can share a process with the CLI bootstrap.
pub fn init_telemetry(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,mnemo={}", log_level)))
        .unwrap_or_else(|_| EnvFilter::new("warn,mnemo=info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => {
            registry
                .with(fmt::layer().compact().with_target(false))
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_current_span(true))
                .try_init()
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format(None), LogFormat::Compact);
        assert_eq!(parse_format(Some("compact")), LogFormat::Compact);
        assert_eq!(parse_format(Some("json")), LogFormat::Json);
        assert_eq!(parse_format(Some("JSON")), LogFormat::Json);
        assert_eq!(parse_format(Some("yaml")), LogFormat::Compact);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_telemetry("debug", LogFormat::Compact);
        // Second install must not panic even with a bogus level string
        init_telemetry("not-a-level", LogFormat::Json);
    }
}
