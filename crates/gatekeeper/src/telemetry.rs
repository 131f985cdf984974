//! Tracing subscriber setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a fmt
//! layer. `RUST_LOG` overrides the configured filter when set.

use gatekeeper_config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global tracing subscriber.
///
/// # Returns
///
/// `true` if this call installed the subscriber, `false` if one was already
/// installed (by an earlier call or by the embedding application).
///
/// # Errors
///
/// Returns an error if the configured filter directive does not parse.
pub fn init_tracing(
    config: &LoggingConfig,
) -> Result<bool, tracing_subscriber::filter::ParseError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
        .try_init()
        .is_ok();

    Ok(installed)
}
