//! # overlay-config
//!
//! Layered, reactive configuration store with live overlays from key/value and
//! secret backends.
//!
//! ## Overview
//!
//! A [`LayeredStore`](core::LayeredStore) resolves every lookup through:
//! - overlays attached from backing stores (Consul KV, Vault, any
//!   [`ConfigurationSource`](sources::ConfigurationSource)), newest first
//! - the base layer: a local defaults file with process environment overrides
//!
//! Overlays that support it receive live updates. Each update raises one
//! coalescing change signal, and a dispatcher task refreshes every registered
//! [`TypedWatcher`](notify::TypedWatcher): strongly typed component
//! configurations that are swapped atomically, only when they changed, and
//! only when the component's refresh callback accepts the new value.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use overlay_config::prelude::*;
//! use overlay_config::sources::kv::{ConsulClient, ConsulConfig, KvSource};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct KafkaConfig {
//!     brokers: Vec<String>,
//!     poll_interval: Duration,
//! }
//!
//! # async fn example() -> Result<()> {
//! let consul = Arc::new(ConsulClient::new(ConsulConfig::default())?);
//!
//! let store = LayeredStore::builder()
//!     .with_file("config", "billing")
//!     .with_overlay(KvSource::new("shared", Arc::clone(&consul)))
//!     .with_seeded_overlay(KvSource::new("billing", consul))
//!     .build()
//!     .await?;
//!
//! let kafka = store.watcher("kafka", |cfg| KafkaConfig {
//!     brokers: cfg.get_string_slice("kafka.brokers"),
//!     poll_interval: cfg.get_duration("kafka.poll_interval"),
//! })?;
//! kafka.on_refresh(|next| {
//!     if next.brokers.is_empty() {
//!         return Err("no brokers configured".into());
//!     }
//!     Ok(())
//! });
//!
//! let cancel = CancellationToken::new();
//! store.watch(cancel.clone()).await;
//!
//! println!("brokers: {:?}", kafka.get().brokers);
//!
//! cancel.cancel();
//! store.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `consul` (default): Consul KV client
//! - `vault`: Vault KV v2 secret store

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod sources;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        ConfigReader, Configurer, LayeredStore, LayeredStoreBuilder, StoreCell,
    };
    pub use crate::error::{ConfigError, Result};
    pub use crate::notify::{ConfigSubscriber, TypedWatcher};
    pub use crate::sources::ConfigurationSource;
}
