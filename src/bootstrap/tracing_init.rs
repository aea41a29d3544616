//! Tracing initialization utilities.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

/// Initialize tracing with the given default filter and output format.
///
/// The filter can be overridden by the `RUST_LOG` environment variable.
/// Output goes to stderr; [`LogFormat::Json`] emits one JSON object per event.
///
/// # Example
///
/// ```rust,no_run
/// use mcp_relay::{init_tracing, LogFormat};
///
/// // Debug for the relay, request spans from tower-http, info for the rest
/// init_tracing("mcp_relay=debug,tower_http=debug,info", LogFormat::Pretty);
/// ```
///
/// # Filter Syntax
///
/// The filter follows the `tracing_subscriber::EnvFilter` syntax:
/// - `info` - Enable info level for all targets
/// - `mcp_relay=debug` - Enable debug level for the relay
/// - `mcp_relay::transport=trace` - Trace level for a specific module
pub fn init_tracing(default_filter: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
