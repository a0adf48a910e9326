//! Process-wide tracing subscriber.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Filter for the subscriber: `RUST_LOG` when it is set and parses,
/// otherwise the configured level.
pub fn build_filter(level: &str) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        eprintln!("Warning: ignoring unparsable {}", EnvFilter::DEFAULT_ENV);
    }
    EnvFilter::new(level)
}

/// Installs the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let fmt_layer = fmt::layer()
        .with_target(config.with_target)
        .with_ansi(config.ansi);
    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            ansi: false,
            ..Default::default()
        };
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
