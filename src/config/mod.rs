//! Configuration for the billing gateway.
//!
//! The service is configured via a TOML file with environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [backend]
//! api_key = "${GEMINI_API_KEY}"
//! ```

mod auth;
mod backend;
mod database;
mod jobs;
mod limits;
mod server;

use std::path::Path;

pub use auth::*;
pub use backend::*;
pub use database::*;
pub use jobs::*;
pub use limits::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration. Every section is optional with defaults good
/// enough for local development against an on-disk SQLite file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GateConfig {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// SQLite storage configuration.
    pub database: DatabaseConfig,

    /// Bearer token verification backend.
    pub auth: AuthConfig,

    /// Generation backend (models, API key, timeout).
    pub backend: BackendConfig,

    /// Credit prices and USD rate tables.
    pub pricing: crate::pricing::PricingConfig,

    /// Plan limits and demo provisioning.
    pub limits: LimitsConfig,

    /// Background jobs (reservation sweeper).
    pub jobs: JobsConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("configuration validation error: {0}")]
    Validation(String),
}

impl GateConfig {
    /// Load configuration from a TOML file, expanding `${VAR_NAME}`
    /// references from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: GateConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.timeout_secs must be positive; an unbounded generation call \
                 can pin a reservation forever"
                    .into(),
            ));
        }
        if self.jobs.reservation_ttl_secs < self.backend.timeout_secs {
            return Err(ConfigError::Validation(format!(
                "jobs.reservation_ttl_secs ({}) must not be shorter than \
                 backend.timeout_secs ({}): the sweeper would roll back \
                 reservations for requests still in flight",
                self.jobs.reservation_ttl_secs, self.backend.timeout_secs
            )));
        }
        if self.limits.demo.credits < 0 || self.limits.demo.images < 0 {
            return Err(ConfigError::Validation(
                "limits.demo counters must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for cap in re.captures_iter(input) {
        let whole = cap.get(0).expect("capture 0 always present");
        result.push_str(&input[last_end..whole.start()]);

        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        result.push_str(&value);

        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);
    Ok(result)
}
