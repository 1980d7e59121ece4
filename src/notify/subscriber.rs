//! Subscribers refreshed by reconciliation passes.

use crate::core::ConfigReader;
use crate::error::{ConfigError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Error a refresh callback returns to reject a candidate value.
pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

type Constructor<T> = Box<dyn Fn(&dyn ConfigReader) -> T + Send + Sync>;
type RefreshCallback<T> = Box<dyn Fn(&T) -> std::result::Result<(), RefreshError> + Send + Sync>;

/// A component the dispatcher refreshes after every change.
pub trait ConfigSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Recompute from the current store. `Ok(true)` when a new value was
    /// applied, `Ok(false)` when nothing changed.
    fn try_update(&self) -> Result<bool>;
}

/// Materialized, strongly typed view over the store.
///
/// Holds the last value built by `create` and rebuilds it on each
/// [`try_update`](ConfigSubscriber::try_update). A candidate equal to the held
/// value is discarded; a different one is offered to the refresh callback and
/// swapped in only if the callback accepts it. Readers always see a whole
/// value, either the old one or the new one.
///
/// # Examples
///
/// ```rust
/// use overlay_config::prelude::*;
/// use overlay_config::core::ConfigData;
/// use config::Value;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct PoolConfig {
///     size: i64,
/// }
///
/// let mut defaults = ConfigData::new();
/// defaults.insert("pool_size".to_string(), Value::from(4i64));
/// let store = LayeredStore::from_defaults(defaults);
///
/// let pool = store
///     .watcher("pool", |cfg| PoolConfig { size: cfg.get_int("pool_size") })
///     .unwrap();
/// assert_eq!(pool.get().size, 4);
/// assert!(!pool.try_update().unwrap());
/// ```
pub struct TypedWatcher<T> {
    name: String,
    current: ArcSwap<T>,
    reader: Arc<dyn ConfigReader>,
    create: Constructor<T>,
    // Serializes try_update and guards the callback
    refresh: Mutex<Option<RefreshCallback<T>>>,
}

impl<T> TypedWatcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Build the initial value from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SubscriberUpdate`] if `create` panics.
    pub fn new<F>(name: impl Into<String>, reader: Arc<dyn ConfigReader>, create: F) -> Result<Self>
    where
        F: Fn(&dyn ConfigReader) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        let initial = panic::catch_unwind(AssertUnwindSafe(|| create(reader.as_ref())))
            .map_err(|payload| panicked(&name, "constructor", payload))?;

        Ok(Self {
            name,
            current: ArcSwap::from_pointee(initial),
            reader,
            create: Box::new(create),
            refresh: Mutex::new(None),
        })
    }

    /// Current value.
    pub fn get(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Install the callback consulted before a changed value is applied.
    /// Returning an error keeps the previous value.
    pub fn on_refresh<F>(&self, callback: F)
    where
        F: Fn(&T) -> std::result::Result<(), RefreshError> + Send + Sync + 'static,
    {
        *self.refresh.lock() = Some(Box::new(callback));
    }
}

impl<T> ConfigSubscriber for TypedWatcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn try_update(&self) -> Result<bool> {
        let refresh = self.refresh.lock();

        let candidate = panic::catch_unwind(AssertUnwindSafe(|| (self.create)(self.reader.as_ref())))
            .map_err(|payload| panicked(&self.name, "constructor", payload))?;

        if **self.current.load() == candidate {
            return Ok(false);
        }

        if let Some(callback) = refresh.as_ref() {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&candidate))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(ConfigError::SubscriberUpdate {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(payload) => return Err(panicked(&self.name, "refresh callback", payload)),
            }
        }

        self.current.store(Arc::new(candidate));
        Ok(true)
    }
}

fn panicked(name: &str, stage: &str, payload: Box<dyn Any + Send>) -> ConfigError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    ConfigError::SubscriberUpdate {
        name: name.to_string(),
        reason: format!("{} panicked: {}", stage, message),
    }
}
