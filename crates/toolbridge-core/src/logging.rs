//! Tracing subscriber setup for embedding applications

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BridgeError, BridgeResult};

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> BridgeResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            BridgeError::config(format!("Invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Install the global fmt subscriber.
///
/// Fails with a configuration error if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> BridgeResult<()> {
    let filter = env_filter(config)?;
    let spans = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(spans)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| BridgeError::config(format!("Failed to install tracing subscriber: {}", e)))
}
