//! Top-level operator configuration.

use fgasync_core::config::{load_config, ConfigError, ConfigSource};
use fgasync_core::logging::LoggingConfig;
use fgasync_openfga::OpenFgaConfig;
use fgasync_reconcilers::GeneratorConfig;
use fgasync_runtime::ControllerConfig;
use serde::Deserialize;

/// Everything the operator reads from `fgasync.yaml`.
///
/// ```yaml
/// openfga:
///   endpoint: "http://openfga:8081"
///   api-token: "${OPENFGA_TOKEN}"
/// controller:
///   max-concurrent-reconciles: 8
/// generator:
///   orgs-root: "root:orgs"
/// logging:
///   format: json
/// ```
///
/// Every section is optional. Environment variables override file values:
/// `FGASYNC_OPENFGA__API_TOKEN` sets `openfga.api-token`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperatorConfig {
    #[serde(default)]
    pub openfga: OpenFgaConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OperatorConfig {
    /// Load and validate `fgasync.yaml` with its profile, `.env` and
    /// environment layers from the working directory.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = load_config()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(source: &ConfigSource) -> Result<Self, ConfigError> {
        let config: Self = source.load()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openfga
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("openfga: {e}")))?;
        self.controller.validate().map_err(ConfigError::Invalid)?;
        self.generator.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}
