//! Typed read access to layered configuration.

use crate::error::Result;
use crate::notify::ConfigSubscriber;
use async_trait::async_trait;
use config::{Value, ValueKind};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Separator used when a list is stored as a single text value.
const LIST_SEPARATOR: char = ',';

/// Read-only, typed view over configuration.
///
/// Implementors supply [`lookup`](ConfigReader::lookup); every typed getter is
/// derived from it. A missing key, or a value that cannot be coerced to the
/// requested type, yields the type's zero value instead of an error.
///
/// # Examples
///
/// ```rust
/// use overlay_config::prelude::*;
/// use overlay_config::core::ConfigData;
/// use config::Value;
///
/// let mut defaults = ConfigData::new();
/// defaults.insert("port".to_string(), Value::from("8080"));
/// let store = LayeredStore::from_defaults(defaults);
///
/// assert_eq!(store.get_int("port"), 8080);
/// assert_eq!(store.get_string("missing"), "");
/// ```
pub trait ConfigReader: Send + Sync {
    /// Resolve a dotted key to its raw value, if any layer sets it.
    fn lookup(&self, key: &str) -> Option<Value>;

    /// Whether any layer sets `key`.
    fn is_set(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Text value, or `""`.
    fn get_string(&self, key: &str) -> String {
        self.lookup(key)
            .and_then(|v| v.into_string().ok())
            .unwrap_or_default()
    }

    /// Text value, or `def` when it is absent or empty.
    fn get_string_or_default(&self, key: &str, def: &str) -> String {
        let value = self.get_string(key);
        if value.is_empty() {
            def.to_string()
        } else {
            value
        }
    }

    /// Boolean value, or `false`.
    fn get_bool(&self, key: &str) -> bool {
        self.lookup(key)
            .and_then(|v| v.into_bool().ok())
            .unwrap_or_default()
    }

    /// Boolean value, or `def` when unset.
    fn get_bool_or_default(&self, key: &str, def: bool) -> bool {
        match self.lookup(key) {
            Some(v) => v.into_bool().unwrap_or_default(),
            None => def,
        }
    }

    /// Integer value, or `0`.
    fn get_int(&self, key: &str) -> i64 {
        self.lookup(key)
            .and_then(|v| v.into_int().ok())
            .unwrap_or_default()
    }

    /// Integer value, or `def` when unset.
    fn get_int_or_default(&self, key: &str, def: i64) -> i64 {
        match self.lookup(key) {
            Some(v) => v.into_int().unwrap_or_default(),
            None => def,
        }
    }

    /// 32-bit integer value, or `0` when absent or out of range.
    fn get_int32(&self, key: &str) -> i32 {
        i32::try_from(self.get_int(key)).unwrap_or_default()
    }

    /// 64-bit integer value, or `0`.
    fn get_int64(&self, key: &str) -> i64 {
        self.get_int(key)
    }

    /// Floating point value, or `0.0`.
    fn get_float64(&self, key: &str) -> f64 {
        self.lookup(key)
            .and_then(|v| v.into_float().ok())
            .unwrap_or_default()
    }

    /// List of strings. A text value is split on commas.
    fn get_string_slice(&self, key: &str) -> Vec<String> {
        self.lookup(key)
            .map(|v| {
                list_items(v)
                    .into_iter()
                    .filter_map(|item| item.into_string().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List of integers. Elements that are not integers are skipped.
    fn get_int_slice(&self, key: &str) -> Vec<i64> {
        self.lookup(key)
            .map(|v| {
                list_items(v)
                    .into_iter()
                    .filter_map(|item| item.into_int().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Duration from a humantime string (`"1m 30s"`, `"250ms"`) or a bare
    /// number of seconds.
    fn get_duration(&self, key: &str) -> Duration {
        self.lookup(key).and_then(to_duration).unwrap_or_default()
    }

    /// Deserialize the value (scalar or subtree) at `key` into `T`.
    fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
        Self: Sized,
    {
        self.lookup(key).and_then(|v| v.try_deserialize().ok())
    }
}

impl dyn ConfigReader + '_ {
    /// [`ConfigReader::get_as`] for trait objects, as handed to
    /// [`TypedWatcher`](crate::notify::TypedWatcher) constructors.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).and_then(|v| v.try_deserialize().ok())
    }
}

/// Full store surface consumed by components: typed reads plus the live-update
/// lifecycle.
#[async_trait]
pub trait Configurer: ConfigReader {
    /// Start live updates from every source that supports them.
    async fn watch(&self, cancel: CancellationToken);

    /// Register a subscriber for future reconciliation passes.
    fn subscribe(&self, subscriber: Arc<dyn ConfigSubscriber>);

    /// Close every source and stop change dispatch.
    async fn close(&self) -> Result<()>;
}

fn list_items(value: Value) -> Vec<Value> {
    match value.kind {
        ValueKind::Array(items) => items,
        ValueKind::String(text) => text
            .split(LIST_SEPARATOR)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Value::from)
            .collect(),
        kind => vec![Value::new(None, kind)],
    }
}

fn to_duration(value: Value) -> Option<Duration> {
    match value.kind {
        ValueKind::String(text) => {
            let text = text.trim();
            match text.parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => humantime::parse_duration(text).ok(),
            }
        }
        ValueKind::Float(secs) if secs >= 0.0 => Duration::try_from_secs_f64(secs).ok(),
        kind => Value::new(None, kind)
            .into_int()
            .ok()
            .and_then(|secs| u64::try_from(secs).ok())
            .map(Duration::from_secs),
    }
}
