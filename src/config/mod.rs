//! Configuration management with environment variable support.

mod relay;

pub use relay::{ConfigError, LogFormat, RelayConfig};
