//! Configuration layers and the tree operations shared by all of them.

use crate::sources::ConfigurationSource;
use config::{Map, Value, ValueKind};
use std::sync::Arc;

/// Nested configuration payload exchanged with every source.
///
/// Leaves are scalars or lists of scalars, branches are `ValueKind::Table`.
pub type ConfigData = Map<String, Value>;

/// Separator between key segments in lookups (`kafka.brokers`).
pub const KEY_SEPARATOR: char = '.';

/// The immutable bottom layer: local file plus process environment.
pub(crate) struct BaseLayer {
    /// File defaults only, used to seed backing stores.
    defaults: ConfigData,
    /// File defaults with environment overrides applied.
    merged: ConfigData,
}

impl BaseLayer {
    pub(crate) fn new(defaults: ConfigData, environment: ConfigData) -> Self {
        let defaults = normalize(defaults);
        let mut merged = defaults.clone();
        merge(&mut merged, normalize(environment));
        Self { defaults, merged }
    }

    pub(crate) fn defaults(&self) -> &ConfigData {
        &self.defaults
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<&Value> {
        lookup(&self.merged, key)
    }
}

/// A source-backed layer stacked above the base.
pub(crate) struct Overlay {
    pub(crate) id: u64,
    pub(crate) source: Arc<dyn ConfigurationSource>,
    data: ConfigData,
}

impl Overlay {
    pub(crate) fn new(id: u64, source: Arc<dyn ConfigurationSource>, data: ConfigData) -> Self {
        Self {
            id,
            source,
            data: normalize(data),
        }
    }

    /// Install a delivered snapshot. Deliveries are full replacements of the
    /// source's contribution, so nothing from the previous snapshot survives.
    pub(crate) fn replace(&mut self, data: ConfigData) {
        self.data = normalize(data);
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<&Value> {
        lookup(&self.data, key)
    }
}

/// Walk a dotted key through nested tables.
///
/// `Nil` leaves count as absent so they fall through to lower layers.
pub fn lookup<'a>(data: &'a ConfigData, key: &str) -> Option<&'a Value> {
    let key = key.to_lowercase();
    let mut segments = key.split(KEY_SEPARATOR);
    let first = segments.next()?;
    let mut current = data.get(first)?;

    for segment in segments {
        current = match &current.kind {
            ValueKind::Table(table) => table.get(segment)?,
            _ => return None,
        };
    }

    match current.kind {
        ValueKind::Nil => None,
        _ => Some(current),
    }
}

/// Deep-merge `src` into `dst`. Tables merge recursively; anything else in
/// `src` replaces what `dst` holds at the same path.
pub fn merge(dst: &mut ConfigData, src: ConfigData) {
    for (key, value) in src {
        let incoming = match value.kind {
            ValueKind::Table(incoming) => incoming,
            kind => {
                dst.insert(key, Value::new(None, kind));
                continue;
            }
        };

        match dst.get_mut(&key).map(|existing| &mut existing.kind) {
            Some(ValueKind::Table(current)) => merge(current, incoming),
            _ => {
                dst.insert(key, Value::new(None, ValueKind::Table(incoming)));
            }
        }
    }
}

/// Lower-case every key in the tree so lookups are case-insensitive.
///
/// Keys that only differ by case are combined: tables merge, and when two
/// leaves collide the spelling that sorts last wins, with a warning.
pub(crate) fn normalize(data: ConfigData) -> ConfigData {
    let mut normalized = ConfigData::new();
    for (key, value) in sorted(data) {
        absorb(&mut normalized, key.to_lowercase(), normalize_value(value));
    }
    normalized
}

// Map iteration order is unspecified; sorting keeps collisions deterministic
fn sorted(data: ConfigData) -> Vec<(String, Value)> {
    let mut entries: Vec<_> = data.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn absorb(dst: &mut ConfigData, key: String, value: Value) {
    if !dst.contains_key(&key) {
        dst.insert(key, value);
        return;
    }
    let Some(existing) = dst.get_mut(&key) else {
        return;
    };

    match value.kind {
        ValueKind::Table(incoming) => {
            if let ValueKind::Table(current) = &mut existing.kind {
                for (child, value) in sorted(incoming) {
                    absorb(current, child, value);
                }
                return;
            }
            tracing::warn!(key = %key, "keys differing only by case collide, last spelling wins");
            existing.kind = ValueKind::Table(incoming);
        }
        kind => {
            tracing::warn!(key = %key, "keys differing only by case collide, last spelling wins");
            existing.kind = kind;
        }
    }
}

fn normalize_value(value: Value) -> Value {
    match value.kind {
        ValueKind::Table(table) => Value::new(None, ValueKind::Table(normalize(table))),
        ValueKind::Array(items) => Value::new(
            None,
            ValueKind::Array(items.into_iter().map(normalize_value).collect()),
        ),
        kind => Value::new(None, kind),
    }
}

/// Build an empty table value.
pub(crate) fn table() -> Value {
    Value::new(None, ValueKind::Table(Map::new()))
}
