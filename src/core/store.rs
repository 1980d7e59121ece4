//! The layered store: one immutable base plus source-backed overlays.

use super::layer::{BaseLayer, ConfigData, Overlay, merge, normalize};
use super::{ConfigReader, Configurer};
use crate::error::{ConfigError, Result};
use crate::notify::{ChangeBus, ConfigSubscriber, TypedWatcher, spawn_dispatcher};
use crate::sources::{ConfigurationSource, EnvSource, FileSource, OnChange};
use async_trait::async_trait;
use config::Value;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where the base layer comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaseOptions {
    /// Directory searched first for the defaults file
    pub config_dir: PathBuf,
    /// File name without extension
    pub file_name: String,
    /// Only environment variables starting with `<prefix>_` are read
    pub env_prefix: Option<String>,
    /// Separator between nested key segments in variable names
    pub env_separator: String,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            file_name: "config".to_string(),
            env_prefix: None,
            env_separator: "__".to_string(),
        }
    }
}

/// Outcome of one reconciliation pass, by subscriber name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Subscribers that applied a new value
    pub applied: Vec<String>,
    /// Subscribers whose value did not change
    pub unchanged: Vec<String>,
    /// Subscribers that failed, with the reason
    pub failed: Vec<(String, String)>,
}

struct State {
    /// Newest attachment first.
    overlays: Vec<Overlay>,
    subscribers: Vec<Arc<dyn ConfigSubscriber>>,
    bus: Option<ChangeBus>,
    dispatcher: Option<JoinHandle<()>>,
    watching: bool,
    closed: bool,
}

struct Shared {
    base: BaseLayer,
    state: RwLock<State>,
    next_overlay_id: AtomicU64,
}

/// Layered, reactive configuration store.
///
/// Lookups scan overlays newest-first and fall back to the base layer.
/// Cloning is cheap; all clones share the same layers and subscribers.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_config::prelude::*;
/// use overlay_config::sources::{KvSource, MemoryKv};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> overlay_config::error::Result<()> {
/// let store = LayeredStore::load_base("config", "billing")?;
///
/// let kv = Arc::new(MemoryKv::new());
/// store.load_from_provider(Arc::new(KvSource::new("shared", Arc::clone(&kv)))).await?;
/// store.load_from_provider(Arc::new(KvSource::new("billing", kv))).await?;
///
/// store.watch(CancellationToken::new()).await;
/// let brokers = store.get_string_slice("kafka.brokers");
/// store.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LayeredStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredStore").finish_non_exhaustive()
    }
}

impl LayeredStore {
    /// Load the base layer from `<dir>/<name>.{yaml,yml,toml,json}` (falling
    /// back to `.` and `./configs`) plus the whole process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Format`] if no file is found or it cannot be parsed.
    pub fn load_base(dir: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self> {
        Self::from_options(&BaseOptions {
            config_dir: dir.into(),
            file_name: name.into(),
            ..BaseOptions::default()
        })
    }

    /// Load the base layer as described by `options`.
    pub fn from_options(options: &BaseOptions) -> Result<Self> {
        let defaults = FileSource::search(&options.config_dir, &options.file_name).load()?;
        let environment = match &options.env_prefix {
            Some(prefix) => EnvSource::new(prefix, &options.env_separator),
            None => EnvSource::unprefixed(&options.env_separator),
        }
        .load()?;

        tracing::debug!(
            config_dir = %options.config_dir.display(),
            file_name = %options.file_name,
            "base layer loaded"
        );
        Ok(Self::with_base(BaseLayer::new(defaults, environment)))
    }

    /// Build a store whose base layer is `defaults`, without reading files or
    /// the environment.
    pub fn from_defaults(defaults: ConfigData) -> Self {
        Self::with_base(BaseLayer::new(defaults, ConfigData::new()))
    }

    fn with_base(base: BaseLayer) -> Self {
        Self {
            shared: Arc::new(Shared {
                base,
                state: RwLock::new(State {
                    overlays: Vec::new(),
                    subscribers: Vec::new(),
                    bus: None,
                    dispatcher: None,
                    watching: false,
                    closed: false,
                }),
                next_overlay_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a builder running the startup sequence in order.
    pub fn builder() -> super::LayeredStoreBuilder {
        super::LayeredStoreBuilder::new()
    }

    /// Seed `source` with the local file defaults.
    ///
    /// Reads the source, merges its snapshot over the file defaults (source
    /// values win) and writes the result back. Keys already present in the
    /// store are left untouched. A source that cannot be written is skipped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SourceRead`] if the read fails, or the write error.
    pub async fn bootstrap(&self, source: &dyn ConfigurationSource) -> Result<()> {
        let current = source.get().await.map_err(|e| ConfigError::SourceRead {
            source_name: source.name(),
            reason: e.to_string(),
        })?;

        // Compare key for key with the lower-cased defaults
        let mut seeded = self.shared.base.defaults().clone();
        merge(&mut seeded, normalize(current));

        match source.set(seeded).await {
            Ok(()) => {
                tracing::info!(source = %source.name(), "source seeded with local defaults");
                Ok(())
            }
            Err(e) if e.is_unsupported() => {
                tracing::warn!(source = %source.name(), "source is read-only, bootstrap write skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read `source` and attach it as the highest-precedence overlay.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SourceRead`] if the read fails; the store is unchanged.
    pub async fn load_from_provider(&self, source: Arc<dyn ConfigurationSource>) -> Result<()> {
        let data = source.get().await.map_err(|e| ConfigError::SourceRead {
            source_name: source.name(),
            reason: e.to_string(),
        })?;

        let id = self.shared.next_overlay_id.fetch_add(1, Ordering::Relaxed);
        let name = source.name();
        self.shared
            .state
            .write()
            .overlays
            .insert(0, Overlay::new(id, source, data));

        tracing::info!(source = %name, "overlay attached");
        Ok(())
    }

    /// Start live updates for every attached overlay whose source can watch.
    ///
    /// Sources that cannot watch are skipped. A source whose watch fails to
    /// start is logged and keeps its last snapshot. Calling this again after
    /// the first time has no effect.
    pub async fn watch(&self, cancel: CancellationToken) {
        let sources: Vec<(u64, Arc<dyn ConfigurationSource>)> = {
            let mut state = self.shared.state.write();
            if state.closed {
                tracing::warn!("watch requested on a closed store");
                return;
            }
            if state.watching {
                tracing::debug!("store is already watching");
                return;
            }
            state.watching = true;

            let (bus, rx) = ChangeBus::new();
            let weak = Arc::downgrade(&self.shared);
            state.dispatcher = Some(spawn_dispatcher(rx, move || {
                if let Some(shared) = weak.upgrade() {
                    shared.reconcile();
                }
            }));
            state.bus = Some(bus);

            state
                .overlays
                .iter()
                .map(|overlay| (overlay.id, Arc::clone(&overlay.source)))
                .collect()
        };

        for (id, source) in sources {
            let on_change = delivery(Arc::downgrade(&self.shared), id);
            match source.watch(cancel.child_token(), on_change).await {
                Ok(()) => tracing::info!(source = %source.name(), "watching source"),
                Err(e) if e.is_unsupported() => {
                    tracing::debug!(source = %source.name(), "source does not support watch")
                }
                Err(e) => {
                    tracing::error!(source = %source.name(), error = %e, "failed to start watch")
                }
            }
        }
    }

    /// Register a subscriber for future reconciliation passes.
    pub fn subscribe(&self, subscriber: Arc<dyn ConfigSubscriber>) {
        tracing::debug!(component = %subscriber.name(), "subscriber registered");
        self.shared.state.write().subscribers.push(subscriber);
    }

    /// Build a [`TypedWatcher`] over this store and subscribe it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SubscriberUpdate`] if `create` panics on the first build.
    pub fn watcher<T, F>(&self, name: impl Into<String>, create: F) -> Result<Arc<TypedWatcher<T>>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&dyn ConfigReader) -> T + Send + Sync + 'static,
    {
        let watcher = Arc::new(TypedWatcher::new(name, Arc::new(self.clone()), create)?);
        self.subscribe(watcher.clone());
        Ok(watcher)
    }

    /// Run one reconciliation pass now, on the calling thread.
    pub fn reconcile(&self) -> ReconcileReport {
        self.shared.reconcile()
    }

    /// Close every source and stop the dispatcher. Idempotent.
    ///
    /// KV sources stop their watch tasks before their close returns. Deliveries
    /// that still arrive afterwards are dropped.
    ///
    /// # Errors
    ///
    /// The close errors of failing sources, aggregated.
    pub async fn close(&self) -> Result<()> {
        let (sources, dispatcher) = {
            let mut state = self.shared.state.write();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            // Dropping the only sender lets the dispatcher drain and exit
            state.bus = None;
            let sources: Vec<_> = state
                .overlays
                .iter()
                .map(|overlay| Arc::clone(&overlay.source))
                .collect();
            (sources, state.dispatcher.take())
        };

        let mut failures = Vec::new();
        for source in sources {
            if let Err(e) = source.close().await {
                tracing::error!(source = %source.name(), error = %e, "failed to close source");
                failures.push(e);
            }
        }

        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                tracing::warn!(error = %e, "change dispatcher ended abnormally");
            }
        }

        // Watchers hold the store; release them so the store can drop
        self.shared.state.write().subscribers.clear();
        tracing::info!("store closed");
        ConfigError::from_failures(failures)
    }

    /// Number of attached overlays.
    pub fn overlay_count(&self) -> usize {
        self.shared.state.read_recursive().overlays.len()
    }
}

fn delivery(shared: Weak<Shared>, id: u64) -> OnChange {
    Arc::new(move |data: ConfigData| {
        if let Some(shared) = shared.upgrade() {
            shared.apply_delta(id, data);
        }
    })
}

impl Shared {
    fn apply_delta(&self, id: u64, data: ConfigData) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.closed {
            tracing::debug!(overlay = id, "store closed, late delivery dropped");
            return;
        }
        let Some(overlay) = state.overlays.iter_mut().find(|overlay| overlay.id == id) else {
            return;
        };
        overlay.replace(data);

        match &state.bus {
            Some(bus) => {
                bus.signal();
            }
            None => tracing::debug!(overlay = id, "no change bus, delivery applied silently"),
        }
    }

    fn reconcile(&self) -> ReconcileReport {
        // Held for the whole pass so subscribe() waits for it to finish
        let state = self.state.read();
        let subscribers = &state.subscribers;

        let outcomes: Vec<(String, Result<bool>)> = thread::scope(|scope| {
            let handles: Vec<_> = subscribers
                .iter()
                .map(|subscriber| {
                    let name = subscriber.name().to_string();
                    (name, scope.spawn(move || subscriber.try_update()))
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(ConfigError::SubscriberUpdate {
                            name: name.clone(),
                            reason: "update panicked".to_string(),
                        })
                    });
                    (name, outcome)
                })
                .collect()
        });

        let mut report = ReconcileReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(true) => {
                    tracing::info!(component = %name, "configuration refreshed");
                    report.applied.push(name);
                }
                Ok(false) => report.unchanged.push(name),
                Err(e) => {
                    tracing::error!(component = %name, error = %e, "configuration refresh failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        tracing::info!(
            applied = report.applied.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "reconciliation pass complete"
        );
        report
    }
}

impl ConfigReader for LayeredStore {
    fn lookup(&self, key: &str) -> Option<Value> {
        let state = self.shared.state.read_recursive();
        state
            .overlays
            .iter()
            .find_map(|overlay| overlay.lookup(key))
            .or_else(|| self.shared.base.lookup(key))
            .cloned()
    }
}

#[async_trait]
impl Configurer for LayeredStore {
    async fn watch(&self, cancel: CancellationToken) {
        LayeredStore::watch(self, cancel).await
    }

    fn subscribe(&self, subscriber: Arc<dyn ConfigSubscriber>) {
        LayeredStore::subscribe(self, subscriber)
    }

    async fn close(&self) -> Result<()> {
        LayeredStore::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Map;

    struct Fixed(ConfigData);

    #[async_trait]
    impl ConfigurationSource for Fixed {
        async fn get(&self) -> Result<ConfigData> {
            Ok(self.0.clone())
        }

        fn name(&self) -> String {
            "fixed".to_string()
        }
    }

    fn data(key: &str, value: impl Into<Value>) -> ConfigData {
        let mut map = Map::new();
        map.insert(key.to_string(), value.into());
        map
    }

    #[tokio::test]
    async fn test_newest_overlay_wins() {
        let store = LayeredStore::from_defaults(data("name", "base"));
        store
            .load_from_provider(Arc::new(Fixed(data("name", "first"))))
            .await
            .unwrap();
        store
            .load_from_provider(Arc::new(Fixed(data("name", "second"))))
            .await
            .unwrap();

        assert_eq!(store.get_string("name"), "second");
        assert_eq!(store.overlay_count(), 2);
    }

    #[tokio::test]
    async fn test_delivery_replaces_overlay_snapshot() {
        let store = LayeredStore::from_defaults(data("a", "base"));
        store
            .load_from_provider(Arc::new(Fixed(data("a", "overlay"))))
            .await
            .unwrap();

        store.shared.apply_delta(0, data("b", "new"));
        // "a" is gone from the overlay, so the base shows through
        assert_eq!(store.get_string("a"), "base");
        assert_eq!(store.get_string("b"), "new");
    }

    #[tokio::test]
    async fn test_reconcile_reports_outcomes() {
        let store = LayeredStore::from_defaults(data("n", 1i64));
        let watcher = store
            .watcher("counter", |cfg| cfg.get_int("n"))
            .unwrap();
        store
            .watcher("always-fails", |cfg| cfg.get_int("n"))
            .unwrap()
            .on_refresh(|_| Err("nope".into()));

        let report = store.reconcile();
        assert_eq!(report.unchanged.len(), 2);

        store
            .load_from_provider(Arc::new(Fixed(data("n", 2i64))))
            .await
            .unwrap();
        let report = store.reconcile();
        assert_eq!(report.applied, vec!["counter".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "always-fails");
        assert_eq!(*watcher.get(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_drops_late_deliveries() {
        let store = LayeredStore::from_defaults(ConfigData::new());
        store
            .load_from_provider(Arc::new(Fixed(data("x", "old"))))
            .await
            .unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();

        store.shared.apply_delta(0, data("x", "late"));
        assert_eq!(store.get_string("x"), "old");
    }
}
