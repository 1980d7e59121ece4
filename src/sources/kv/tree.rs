//! Conversion between flat key/value pairs and nested configuration trees.
//!
//! The backing store holds `<prefix>/<segment>/<segment>/...` keys with raw
//! scalar bytes. Folding splits each key on `/` and builds intermediate
//! tables; flattening walks a tree depth-first and encodes every leaf.

use super::KvPair;
use crate::core::{ConfigData, table};
use crate::error::{ConfigError, Result};
use config::{Value, ValueKind};
use std::collections::BTreeMap;

/// Separator between path segments in stored keys.
pub const PATH_SEPARATOR: char = '/';

/// Fold scanned pairs into a tree.
///
/// When one path is needed both as a leaf and as a branch, the entry seen
/// first in scan order is kept and the later one is dropped with a warning.
pub fn fold(prefix: &str, pairs: &[KvPair]) -> ConfigData {
    let base = prefix.trim_end_matches(PATH_SEPARATOR);
    let root_prefix = format!("{}{}", base, PATH_SEPARATOR);
    let mut root = ConfigData::new();

    for pair in pairs {
        let key = pair.key.strip_prefix(&root_prefix).unwrap_or(&pair.key);
        // The prefix itself and folder markers carry no value
        if key.is_empty() || key.ends_with(PATH_SEPARATOR) || pair.key == base {
            continue;
        }
        let value = String::from_utf8_lossy(&pair.value).into_owned();
        insert(&mut root, key, value);
    }

    root
}

fn insert(root: &mut ConfigData, key: &str, value: String) {
    let segments: Vec<&str> = key.split(PATH_SEPARATOR).collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        let entry = node.entry((*segment).to_string()).or_insert_with(table);
        node = match &mut entry.kind {
            ValueKind::Table(children) => children,
            _ => {
                tracing::warn!(
                    full_key = %key,
                    duplicate_key = %segment,
                    "key is both a value and a path, later entry dropped"
                );
                return;
            }
        };
    }

    if node.contains_key(*leaf) {
        tracing::warn!(
            full_key = %key,
            duplicate_key = %leaf,
            "key is both a value and a path, later entry dropped"
        );
        return;
    }
    node.insert((*leaf).to_string(), Value::from(value));
}

/// Flatten a tree into fully qualified keys and encoded values.
pub fn flatten(prefix: &str, data: &ConfigData) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut out = BTreeMap::new();
    walk(prefix.trim_end_matches(PATH_SEPARATOR), data, &mut out)?;
    Ok(out)
}

fn walk(parent: &str, data: &ConfigData, out: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    for (key, value) in data {
        let path = format!("{}{}{}", parent, PATH_SEPARATOR, key);
        match &value.kind {
            ValueKind::Table(children) => walk(&path, children, out)?,
            _ => {
                let encoded = encode(value)
                    .map_err(|e| ConfigError::Encode(format!("key '{}': {}", path, e)))?;
                out.insert(path, encoded);
            }
        }
    }
    Ok(())
}

/// Encode one leaf value as raw bytes.
///
/// Lists become comma-joined scalar encodings; tables are not leaves.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    match &value.kind {
        ValueKind::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match &item.kind {
                    ValueKind::Array(_) | ValueKind::Table(_) => Err(ConfigError::Encode(
                        "nested collections inside a list are not supported".to_string(),
                    )),
                    kind => Ok(encode_scalar(kind)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(",").into_bytes())
        }
        ValueKind::Table(_) => Err(ConfigError::Encode(
            "a table is not a scalar value".to_string(),
        )),
        kind => Ok(encode_scalar(kind).into_bytes()),
    }
}

fn encode_scalar(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Nil => String::new(),
        ValueKind::Boolean(b) => b.to_string(),
        ValueKind::I64(n) => n.to_string(),
        ValueKind::I128(n) => n.to_string(),
        ValueKind::U64(n) => n.to_string(),
        ValueKind::U128(n) => n.to_string(),
        ValueKind::Float(f) => f.to_string(),
        ValueKind::String(s) => s.clone(),
        ValueKind::Table(_) | ValueKind::Array(_) => String::new(),
    }
}
