//! Connection settings for the OpenFGA backend.

use crate::error::FgaError;
use serde::Deserialize;

fn default_endpoint() -> String {
    "http://localhost:8081".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    5
}
fn default_max_tuples_per_write() -> usize {
    100
}

/// Upper bound OpenFGA accepts for writes plus deletes in one request.
pub const OPENFGA_MAX_TUPLES_PER_WRITE: usize = 100;

/// ```yaml
/// openfga:
///   endpoint: "http://openfga:8081"
///   api-token: "${OPENFGA_TOKEN}"   # optional
///   connect-timeout-secs: 10        # default: 10
///   request-timeout-secs: 5         # default: 5
///   max-tuples-per-write: 100       # default: 100
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpenFgaConfig {
    /// gRPC endpoint of the OpenFGA server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Sent as a Bearer token on every call.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Batch size for tuple writes and deletes.
    #[serde(default = "default_max_tuples_per_write")]
    pub max_tuples_per_write: usize,
}

impl Default for OpenFgaConfig {
    fn default() -> Self {
        Self::new(default_endpoint())
    }
}

impl OpenFgaConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_tuples_per_write: default_max_tuples_per_write(),
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_max_tuples_per_write(mut self, max: usize) -> Self {
        self.max_tuples_per_write = max;
        self
    }

    pub fn validate(&self) -> Result<(), FgaError> {
        if self.endpoint.is_empty() {
            return Err(FgaError::InvalidConfig("endpoint cannot be empty".into()));
        }
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| FgaError::InvalidConfig(format!("endpoint '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FgaError::InvalidConfig(format!(
                "endpoint scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(FgaError::InvalidConfig("timeouts must be positive".into()));
        }
        if self.max_tuples_per_write == 0 || self.max_tuples_per_write > OPENFGA_MAX_TUPLES_PER_WRITE {
            return Err(FgaError::InvalidConfig(format!(
                "max-tuples-per-write must be between 1 and {OPENFGA_MAX_TUPLES_PER_WRITE}"
            )));
        }
        Ok(())
    }
}
