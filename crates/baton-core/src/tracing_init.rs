//! Shared tracing/logging initialization.
//!
//! The scheduler binary and any embedding host use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"baton_scheduler=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Calling this twice is harmless: the second registration is ignored.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let result = if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Initialise tracing from a resolved [`LoggingConfig`].
///
/// `crate_target` is the log target the configured level applies to.
pub fn init_from_config(crate_target: &str, logging: &LoggingConfig) {
    init_tracing(&default_filter(crate_target, &logging.level), logging.json);
}

/// Build a `target=level` filter directive.
pub fn default_filter(crate_target: &str, level: &str) -> String {
    format!("{crate_target}={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_joins_target_and_level() {
        assert_eq!(
            default_filter("baton_scheduler", "debug"),
            "baton_scheduler=debug"
        );
    }

    #[test]
    fn double_init_does_not_panic() {
        init_tracing("baton_core=info", false);
        init_tracing("baton_core=info", true);
    }
}
