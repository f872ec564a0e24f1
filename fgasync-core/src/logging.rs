//! Tracing subscriber setup.

use crate::config::ConfigError;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn default_filter() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// ```yaml
/// logging:
///   format: json        # default: pretty
///   filter: "info,fgasync_reconcilers=debug"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive, used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: default_filter(),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ConfigError::Invalid(format!("logging.filter: {e}")))?,
    };

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .try_init(),
    };
    result.map_err(|e| ConfigError::Invalid(format!("tracing subscriber: {e}")))
}
