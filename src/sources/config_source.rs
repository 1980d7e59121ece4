//! Configuration source trait.

use crate::core::ConfigData;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback receiving a full replacement snapshot from a watching source.
pub type OnChange = Arc<dyn Fn(ConfigData) + Send + Sync>;

/// One backing store the layered store can read from, seed, and watch.
///
/// Implement this trait to plug in a new backend (key/value stores, secret
/// managers, remote APIs). `set` and `watch` default to
/// [`ConfigError::Unsupported`], which callers treat as "skip", not as failure.
///
/// # Examples
///
/// ```rust
/// use overlay_config::core::ConfigData;
/// use overlay_config::error::Result;
/// use overlay_config::sources::ConfigurationSource;
///
/// struct Fixed(ConfigData);
///
/// #[async_trait::async_trait]
/// impl ConfigurationSource for Fixed {
///     async fn get(&self) -> Result<ConfigData> {
///         Ok(self.0.clone())
///     }
///
///     fn name(&self) -> String {
///         "fixed".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// Fetch the current snapshot.
    async fn get(&self) -> Result<ConfigData>;

    /// Write a snapshot back to the store.
    async fn set(&self, _data: ConfigData) -> Result<()> {
        Err(ConfigError::Unsupported)
    }

    /// Register `on_change` and return immediately. Future snapshots are
    /// delivered asynchronously until `cancel` fires or the source is closed.
    async fn watch(&self, _cancel: CancellationToken, _on_change: OnChange) -> Result<()> {
        Err(ConfigError::Unsupported)
    }

    /// Release the source. Must be idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable name for logs.
    fn name(&self) -> String;
}
