//! Hierarchical key/value configuration source.
//!
//! Keys live under a shared prefix (`shared/kafka/brokers`) and are folded into
//! a nested tree on read. Writes seed missing keys only, and live updates come
//! from a long-poll prefix watch that re-scans the whole prefix on every change.

#[cfg(feature = "consul")]
pub mod consul;
mod memory;
pub mod tree;

#[cfg(feature = "consul")]
pub use consul::{ConsulClient, ConsulConfig};
pub use memory::MemoryKv;

use super::{ConfigurationSource, OnChange};
use crate::core::ConfigData;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One stored key and its raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Fully qualified key, including the prefix
    pub key: String,
    /// Raw value bytes
    pub value: Vec<u8>,
}

impl KvPair {
    /// Create a pair.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Result of a prefix scan.
#[derive(Debug, Clone, Default)]
pub struct KvListing {
    /// Pairs under the prefix, in store scan order
    pub pairs: Vec<KvPair>,
    /// Store modification index observed by the scan
    pub index: u64,
}

/// Parameters for a long-poll scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingQuery {
    /// Return only once the store index moves past this value
    pub index: u64,
    /// Upper bound on how long the store may hold the request
    pub wait: Duration,
}

/// Minimal client surface a hierarchical key/value store must offer.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Scan every key under `prefix`. With a query, block until the store
    /// index exceeds `query.index` or `query.wait` elapses.
    async fn list(&self, prefix: &str, query: Option<BlockingQuery>) -> Result<KvListing>;

    /// Create `key` if it does not exist. Returns `false` when the key was
    /// already present and nothing was written.
    async fn insert(&self, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Release client resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Watch loop tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Long-poll wait passed to the store
    #[serde(with = "humantime_serde")]
    pub wait: Duration,
    /// First delay after a failed poll
    #[serde(with = "humantime_serde")]
    pub retry_min: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub retry_max: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(300),
            retry_min: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// Hierarchical key/value source rooted at one prefix.
///
/// # Examples
///
/// ```rust
/// use overlay_config::sources::kv::{KvSource, MemoryKv};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryKv::new());
/// let shared = KvSource::new("shared", Arc::clone(&store));
/// let service = KvSource::new("billing", store);
/// ```
pub struct KvSource<C> {
    prefix: String,
    client: Arc<C>,
    options: WatchOptions,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: KvClient + 'static> KvSource<C> {
    /// Create a source reading keys under `prefix`.
    pub fn new(prefix: impl Into<String>, client: Arc<C>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches(tree::PATH_SEPARATOR).to_string(),
            client,
            options: WatchOptions::default(),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override watch loop tuning.
    pub fn with_watch_options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    /// The prefix this source reads.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // Scans include the trailing separator so `svc` never matches `svc2/...`
    fn scan_prefix(&self) -> String {
        format!("{}{}", self.prefix, tree::PATH_SEPARATOR)
    }
}

#[async_trait]
impl<C: KvClient + 'static> ConfigurationSource for KvSource<C> {
    async fn get(&self) -> Result<ConfigData> {
        let listing = self.client.list(&self.scan_prefix(), None).await?;
        Ok(tree::fold(&self.prefix, &listing.pairs))
    }

    async fn set(&self, data: ConfigData) -> Result<()> {
        let entries = tree::flatten(&self.prefix, &data)?;

        let writes = entries.into_iter().map(|(key, value)| {
            let client = Arc::clone(&self.client);
            async move {
                match client.insert(&key, value).await {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        tracing::debug!(key = %key, "key already present, not overwritten");
                        Ok(())
                    }
                    Err(e) => Err(ConfigError::Write {
                        key,
                        reason: e.to_string(),
                    }),
                }
            }
        });

        let failures = join_all(writes)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        ConfigError::from_failures(failures)
    }

    async fn watch(&self, cancel: CancellationToken, on_change: OnChange) -> Result<()> {
        if self.stop.is_cancelled() {
            return Err(ConfigError::Watch(format!(
                "source '{}' is closed",
                self.name()
            )));
        }

        // Registration: the first scan proves the store is reachable
        let initial = self
            .client
            .list(&self.scan_prefix(), None)
            .await
            .map_err(|e| ConfigError::Watch(format!("prefix '{}': {}", self.prefix, e)))?;

        let watch = WatchLoop {
            prefix: self.prefix.clone(),
            scan: self.scan_prefix(),
            client: Arc::clone(&self.client),
            options: self.options.clone(),
            cancel,
            stop: self.stop.child_token(),
            on_change,
        };
        let handle = tokio::spawn(watch.run(initial));
        self.tasks.lock().push(handle);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stop.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(prefix = %self.prefix, error = %e, "watch task ended abnormally");
            }
        }
        self.client.close().await
    }

    fn name(&self) -> String {
        format!("kv:{}", self.prefix)
    }
}

struct WatchLoop<C> {
    prefix: String,
    scan: String,
    client: Arc<C>,
    options: WatchOptions,
    cancel: CancellationToken,
    stop: CancellationToken,
    on_change: OnChange,
}

impl<C: KvClient> WatchLoop<C> {
    async fn run(self, initial: KvListing) {
        let mut index = initial.index;
        (self.on_change)(tree::fold(&self.prefix, &initial.pairs));

        let mut backoff = self.options.retry_min;
        loop {
            let query = BlockingQuery {
                index,
                wait: self.options.wait,
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.stop.cancelled() => break,
                result = self.client.list(&self.scan, Some(query)) => result,
            };

            match result {
                Ok(listing) => {
                    backoff = self.options.retry_min;
                    if listing.index < index {
                        // Store index went backwards (snapshot restore); rescan from scratch
                        index = 0;
                        continue;
                    }
                    if listing.index == index {
                        continue;
                    }
                    index = listing.index;
                    (self.on_change)(tree::fold(&self.prefix, &listing.pairs));
                }
                Err(e) => {
                    tracing::error!(
                        prefix = %self.prefix,
                        error = %e,
                        retry_in = ?backoff,
                        "key/value watch poll failed"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.options.retry_max);
                }
            }
        }

        tracing::debug!(prefix = %self.prefix, "key/value watch stopped");
    }
}
