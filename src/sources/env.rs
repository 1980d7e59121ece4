//! Environment variable configuration source.

use super::ConfigurationSource;
use crate::core::ConfigData;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use config::{Environment, Map};
use std::env;

/// Environment variable configuration source.
///
/// Loads configuration from environment variables, splitting variable names on
/// `separator` into nested keys. Values are parsed into numbers and booleans
/// where possible. Read-only.
///
/// # Examples
///
/// ```rust
/// use overlay_config::sources::EnvSource;
///
/// // APP_SERVER__PORT=8080 -> server.port = 8080
/// let prefixed = EnvSource::new("APP", "__");
///
/// // SERVER__PORT=8080 -> server.port = 8080
/// let all = EnvSource::unprefixed("__");
/// ```
pub struct EnvSource {
    prefix: Option<String>,
    separator: String,
}

impl EnvSource {
    /// Read variables starting with `<prefix>_`.
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            separator: separator.into(),
        }
    }

    /// Read every variable in the process environment.
    pub fn unprefixed(separator: impl Into<String>) -> Self {
        Self {
            prefix: None,
            separator: separator.into(),
        }
    }

    /// Collect the environment synchronously.
    pub fn load(&self) -> Result<ConfigData> {
        let environment = match &self.prefix {
            Some(prefix) => Environment::with_prefix(prefix),
            None => Environment::default(),
        }
        .prefix_separator("_")
        .separator(&self.separator)
        .try_parsing(true)
        .source(Some(variables()));

        let collected = config::Config::builder()
            .add_source(environment)
            .build()
            .map_err(|e| {
                ConfigError::Format(format!("Failed to load environment variables: {}", e))
            })?;

        collected.try_deserialize::<ConfigData>().map_err(|e| {
            ConfigError::Format(format!("Failed to parse environment variables: {}", e))
        })
    }
}

/// Snapshot the process environment, skipping variables that are not valid
/// UTF-8 instead of panicking on them.
fn variables() -> Map<String, String> {
    env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = match key {
                    Ok(key) => key,
                    Err(raw) => raw.to_string_lossy().into_owned(),
                };
                tracing::warn!(variable = %key, "skipping environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ConfigurationSource for EnvSource {
    async fn get(&self) -> Result<ConfigData> {
        self.load()
    }

    fn name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("env:{}*", prefix),
            None => "env:*".to_string(),
        }
    }
}
