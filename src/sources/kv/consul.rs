//! Consul key/value client.

use super::{BlockingQuery, KvClient, KvListing, KvPair};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Connection settings for a Consul agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agent base URL
    pub address: String,
    /// ACL token sent with every request
    pub token: Option<String>,
    /// Datacenter to query, agent default when unset
    pub datacenter: Option<String>,
    /// Timeout for non-blocking requests
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
}

/// [`KvClient`] backed by the Consul HTTP API.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_config::sources::kv::{ConsulClient, ConsulConfig, KvSource};
/// use std::sync::Arc;
///
/// # fn example() -> overlay_config::error::Result<()> {
/// let client = Arc::new(ConsulClient::new(ConsulConfig {
///     address: "http://consul:8500".to_string(),
///     ..ConsulConfig::default()
/// })?);
/// let shared = KvSource::new("shared", Arc::clone(&client));
/// let service = KvSource::new("billing", client);
/// # Ok(())
/// # }
/// ```
pub struct ConsulClient {
    http: Client,
    config: ConsulConfig,
}

impl ConsulClient {
    /// Create a client. No request is made until the first call.
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ConfigError::Client(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/v1/kv/{}",
            self.config.address.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.config.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        };
        match &self.config.datacenter {
            Some(dc) => builder.query(&[("dc", dc)]),
            None => builder,
        }
    }
}

#[async_trait]
impl KvClient for ConsulClient {
    async fn list(&self, prefix: &str, query: Option<BlockingQuery>) -> Result<KvListing> {
        let mut request = self
            .request(self.http.get(self.url(prefix)))
            .query(&[("recurse", "true")]);

        request = match query {
            Some(query) => {
                let wait_ms = query.wait.as_millis().to_string() + "ms";
                // Consul adds up to wait/16 of jitter on top of the requested wait
                let timeout = query.wait + query.wait / 16 + Duration::from_secs(5);
                request
                    .query(&[("index", query.index.to_string()), ("wait", wait_ms)])
                    .timeout(timeout)
            }
            None => request.timeout(self.config.timeout),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ConfigError::Client(format!("Consul request failed: {}", e)))?;

        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(KvListing {
                pairs: Vec::new(),
                index,
            });
        }
        if !status.is_success() {
            return Err(ConfigError::Client(format!(
                "Consul request failed with status {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let entries: Vec<KvEntry> = response
            .json()
            .await
            .map_err(|e| ConfigError::Client(format!("Failed to parse Consul response: {}", e)))?;

        let pairs = entries
            .into_iter()
            .map(|entry| {
                let value = match entry.value {
                    Some(encoded) => STANDARD.decode(encoded).map_err(|e| {
                        ConfigError::Client(format!("Invalid value for '{}': {}", entry.key, e))
                    })?,
                    None => Vec::new(),
                };
                Ok(KvPair::new(entry.key, value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(KvListing { pairs, index })
    }

    async fn insert(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        // cas=0 only succeeds when the key does not exist yet
        let response = self
            .request(self.http.put(self.url(key)))
            .query(&[("cas", "0")])
            .timeout(self.config.timeout)
            .body(value)
            .send()
            .await
            .map_err(|e| ConfigError::Client(format!("Consul request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfigError::Client(format!(
                "Consul write failed with status {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<bool>()
            .await
            .map_err(|e| ConfigError::Client(format!("Failed to parse Consul response: {}", e)))
    }
}
