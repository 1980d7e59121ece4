//! Builder for assembling a LayeredStore at startup.

use crate::core::{BaseOptions, ConfigData, LayeredStore};
use crate::error::Result;
use crate::sources::ConfigurationSource;
use std::path::PathBuf;
use std::sync::Arc;

enum Base {
    Options(BaseOptions),
    Defaults(ConfigData),
}

enum Step {
    Overlay(Arc<dyn ConfigurationSource>),
    Seeded(Arc<dyn ConfigurationSource>),
}

/// Builder for constructing a [`LayeredStore`].
///
/// Overlays are attached in the order they are added, so the last one added
/// has the highest precedence. The first failing step aborts the build.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_config::prelude::*;
/// use overlay_config::sources::{KvSource, MemoryKv};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<()> {
/// let kv = Arc::new(MemoryKv::new());
///
/// let store = LayeredStore::builder()
///     .with_file("config", "billing")
///     .with_overlay(KvSource::new("shared", Arc::clone(&kv)))
///     .with_seeded_overlay(KvSource::new("billing", kv))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct LayeredStoreBuilder {
    base: Base,
    steps: Vec<Step>,
}

impl LayeredStoreBuilder {
    /// Create a builder with an empty base layer.
    pub fn new() -> Self {
        Self {
            base: Base::Defaults(ConfigData::new()),
            steps: Vec::new(),
        }
    }

    /// Load the base layer from `<dir>/<name>.*` plus the process environment.
    pub fn with_file(self, dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.with_options(BaseOptions {
            config_dir: dir.into(),
            file_name: name.into(),
            ..BaseOptions::default()
        })
    }

    /// Load the base layer as described by `options`.
    pub fn with_options(mut self, options: BaseOptions) -> Self {
        self.base = Base::Options(options);
        self
    }

    /// Use in-memory data as the base layer.
    pub fn with_defaults(mut self, defaults: ConfigData) -> Self {
        self.base = Base::Defaults(defaults);
        self
    }

    /// Attach `source` as an overlay.
    pub fn with_overlay<S: ConfigurationSource + 'static>(mut self, source: S) -> Self {
        self.steps.push(Step::Overlay(Arc::new(source)));
        self
    }

    /// Attach `source` as an overlay, then seed it with the local defaults.
    pub fn with_seeded_overlay<S: ConfigurationSource + 'static>(mut self, source: S) -> Self {
        self.steps.push(Step::Seeded(Arc::new(source)));
        self
    }

    /// Load the base layer and run every step in order.
    pub async fn build(self) -> Result<LayeredStore> {
        let store = match self.base {
            Base::Options(options) => LayeredStore::from_options(&options)?,
            Base::Defaults(defaults) => LayeredStore::from_defaults(defaults),
        };

        for step in self.steps {
            match step {
                Step::Overlay(source) => store.load_from_provider(source).await?,
                Step::Seeded(source) => {
                    store.load_from_provider(Arc::clone(&source)).await?;
                    store.bootstrap(source.as_ref()).await?;
                }
            }
        }

        Ok(store)
    }
}

impl Default for LayeredStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
