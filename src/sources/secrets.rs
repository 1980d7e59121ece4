//! Read-only secret bundle source.

use super::ConfigurationSource;
use crate::core::ConfigData;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use config::{Map, Value, ValueKind};
use serde_json::Value as JsonValue;

/// Raw secret bundle as stored by the secret manager.
pub type SecretBundle = serde_json::Map<String, JsonValue>;

/// Point-read access to a versioned secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the latest version of the bundle at `path` under `mount`.
    async fn read_kv(&self, mount: &str, path: &str) -> Result<SecretBundle>;
}

/// Secrets source reading one bundle at a fixed path.
///
/// Only `get` is supported. Rotated secrets are picked up by loading the
/// source again, never through `watch`.
///
/// # Examples
///
/// ```rust,ignore
/// use overlay_config::sources::secrets::{connect, SecretsSource, VaultConfig};
///
/// let client = connect(&VaultConfig::default())?;
/// let secrets = SecretsSource::new(client, "secret", "billing/credentials");
/// ```
pub struct SecretsSource<S> {
    store: S,
    mount: String,
    path: String,
}

impl<S: SecretStore> SecretsSource<S> {
    /// Create a source for the bundle at `mount`/`path`.
    pub fn new(store: S, mount: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            store,
            mount: mount.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl<S: SecretStore> ConfigurationSource for SecretsSource<S> {
    async fn get(&self) -> Result<ConfigData> {
        let bundle = self.store.read_kv(&self.mount, &self.path).await?;
        if bundle.is_empty() {
            return Err(ConfigError::Client(format!(
                "secret bundle at '{}/{}' is empty",
                self.mount, self.path
            )));
        }
        Ok(bundle_to_config(bundle))
    }

    fn name(&self) -> String {
        format!("secrets:{}/{}", self.mount, self.path)
    }
}

/// Convert a JSON bundle into configuration data.
pub fn bundle_to_config(bundle: SecretBundle) -> ConfigData {
    bundle
        .into_iter()
        .map(|(key, value)| (key, json_to_value(value)))
        .collect()
}

fn json_to_value(value: JsonValue) -> Value {
    let kind = match value {
        JsonValue::Null => ValueKind::Nil,
        JsonValue::Bool(b) => ValueKind::Boolean(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                ValueKind::I64(i)
            } else if let Some(u) = n.as_u64() {
                ValueKind::U64(u)
            } else {
                ValueKind::Float(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::String(s) => ValueKind::String(s),
        JsonValue::Array(items) => ValueKind::Array(items.into_iter().map(json_to_value).collect()),
        JsonValue::Object(map) => {
            let table: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect();
            ValueKind::Table(table)
        }
    };
    Value::new(None, kind)
}

#[cfg(feature = "vault")]
pub use vault::{VaultConfig, connect};

#[cfg(feature = "vault")]
mod vault {
    use super::{SecretBundle, SecretStore};
    use crate::error::{ConfigError, Result};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;
    use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
    use vaultrs::kv2;

    /// Connection settings for a Vault server.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct VaultConfig {
        /// Server address
        pub address: String,
        /// Client token
        pub token: String,
        /// Enterprise namespace
        pub namespace: Option<String>,
        /// Request timeout
        #[serde(with = "humantime_serde")]
        pub timeout: Duration,
    }

    impl Default for VaultConfig {
        fn default() -> Self {
            Self {
                address: "http://127.0.0.1:8200".to_string(),
                token: String::new(),
                namespace: None,
                timeout: Duration::from_secs(10),
            }
        }
    }

    /// Build a Vault client from `config`.
    pub fn connect(config: &VaultConfig) -> Result<VaultClient> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address);
        settings_builder.timeout(Some(config.timeout));
        if let Some(namespace) = &config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }
        if !config.token.is_empty() {
            settings_builder.token(&config.token);
        }

        let settings = settings_builder.build().map_err(|e| {
            ConfigError::Client(format!("Failed to build Vault client settings: {}", e))
        })?;

        let client = VaultClient::new(settings)
            .map_err(|e| ConfigError::Client(format!("Failed to create Vault client: {}", e)))?;

        tracing::info!(address = %config.address, "Vault client created");
        Ok(client)
    }

    #[async_trait]
    impl SecretStore for VaultClient {
        async fn read_kv(&self, mount: &str, path: &str) -> Result<SecretBundle> {
            kv2::read::<SecretBundle>(self, mount, path)
                .await
                .map_err(|e| {
                    ConfigError::Client(format!("Failed to read secret '{}/{}': {}", mount, path, e))
                })
        }
    }
}
