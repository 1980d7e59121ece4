//! Exactly-once store initialisation for a composition root.

use crate::core::LayeredStore;
use crate::error::{ConfigError, Result};
use std::future::Future;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds the one store of a process, created on demand.
///
/// The cell belongs to whoever owns startup (typically a `static` in the
/// binary crate); this crate never creates one itself. A second `init` fails
/// instead of silently returning the first store.
///
/// # Examples
///
/// ```rust
/// use overlay_config::prelude::*;
/// use overlay_config::core::{ConfigData, StoreCell};
///
/// static STORE: StoreCell = StoreCell::new();
///
/// # async fn example() -> Result<()> {
/// let store = STORE
///     .init(|| async { Ok(LayeredStore::from_defaults(ConfigData::new())) })
///     .await?;
/// assert!(STORE.get().is_ok());
///
/// let again = STORE
///     .init(|| async { Ok(LayeredStore::from_defaults(ConfigData::new())) })
///     .await;
/// assert!(again.is_err());
/// # Ok(())
/// # }
/// ```
pub struct StoreCell {
    started: AtomicBool,
    store: OnceLock<LayeredStore>,
}

impl StoreCell {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            store: OnceLock::new(),
        }
    }

    /// Run `init` and keep its store.
    ///
    /// # Errors
    ///
    /// [`ConfigError::AlreadyInitialized`] on every call after the first,
    /// including after a first call that failed; otherwise the error of `init`.
    pub async fn init<F, Fut>(&self, init: F) -> Result<LayeredStore>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LayeredStore>>,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ConfigError::AlreadyInitialized);
        }

        let store = init().await?;
        self.store
            .set(store.clone())
            .map_err(|_| ConfigError::AlreadyInitialized)?;
        Ok(store)
    }

    /// The initialised store.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] before a successful `init`.
    pub fn get(&self) -> Result<LayeredStore> {
        self.store.get().cloned().ok_or(ConfigError::NotInitialized)
    }
}

impl Default for StoreCell {
    fn default() -> Self {
        Self::new()
    }
}
