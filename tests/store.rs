//! Integration tests for layering, bootstrap and provider loading.

#![allow(unsafe_code)] // For env var manipulation in tests

use async_trait::async_trait;
use config::{Map, Value};
use overlay_config::core::{BaseOptions, ConfigData};
use overlay_config::prelude::*;
use overlay_config::sources::{KvSource, MemoryKv};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Source serving a fixed snapshot and recording writes.
struct Recording {
    snapshot: ConfigData,
    writable: bool,
    written: Mutex<Option<ConfigData>>,
}

impl Recording {
    fn new(snapshot: ConfigData, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            writable,
            written: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ConfigurationSource for Recording {
    async fn get(&self) -> Result<ConfigData> {
        Ok(self.snapshot.clone())
    }

    async fn set(&self, data: ConfigData) -> Result<()> {
        if !self.writable {
            return Err(ConfigError::Unsupported);
        }
        *self.written.lock() = Some(data);
        Ok(())
    }

    fn name(&self) -> String {
        "recording".to_string()
    }
}

struct Unreachable;

#[async_trait]
impl ConfigurationSource for Unreachable {
    async fn get(&self) -> Result<ConfigData> {
        Err(ConfigError::Client("connection refused".to_string()))
    }

    fn name(&self) -> String {
        "unreachable".to_string()
    }
}

/// Source whose writes fail outright.
struct RejectsWrites;

#[async_trait]
impl ConfigurationSource for RejectsWrites {
    async fn get(&self) -> Result<ConfigData> {
        Ok(ConfigData::new())
    }

    async fn set(&self, _data: ConfigData) -> Result<()> {
        Err(ConfigError::Write {
            key: "svc/a".to_string(),
            reason: "permission denied".to_string(),
        })
    }

    fn name(&self) -> String {
        "rejects-writes".to_string()
    }
}

fn table(entries: &[(&str, Value)]) -> ConfigData {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value.clone());
    }
    map
}

fn kafka(brokers: &[&str]) -> ConfigData {
    let brokers: Vec<Value> = brokers.iter().map(|b| Value::from(*b)).collect();
    table(&[("kafka", Value::from(table(&[("brokers", Value::from(brokers))])))])
}

fn base_with_port() -> LayeredStore {
    LayeredStore::from_defaults(table(&[(
        "app",
        Value::from(table(&[("port", Value::from(8080i64))])),
    )]))
}

#[tokio::test]
async fn test_newest_overlay_has_precedence() {
    let store = base_with_port();
    store
        .load_from_provider(Recording::new(kafka(&["host:9092"]), false))
        .await
        .unwrap();
    store
        .load_from_provider(Recording::new(kafka(&["host2:9092", "host2:9093"]), false))
        .await
        .unwrap();

    assert_eq!(
        store.get_string_slice("kafka.brokers"),
        vec!["host2:9092".to_string(), "host2:9093".to_string()]
    );
    assert_eq!(store.get_int("app.port"), 8080);
}

#[tokio::test]
async fn test_absent_keys_are_zero_valued() {
    let store = base_with_port();
    assert_eq!(store.get_string("missing.key"), "");
    assert_eq!(store.get_int("missing.key"), 0);
    assert_eq!(store.get_duration("missing.key"), Duration::ZERO);
    assert!(!store.is_set("missing.key"));
}

#[tokio::test]
async fn test_bootstrap_writes_merged_snapshot() {
    let store = LayeredStore::from_defaults(table(&[("a", Value::from(1i64))]));
    let source = Recording::new(table(&[("b", Value::from(2i64))]), true);

    store.bootstrap(source.as_ref()).await.unwrap();

    let written = source.written.lock().clone().unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written["a"].clone().into_int().unwrap(), 1);
    assert_eq!(written["b"].clone().into_int().unwrap(), 2);
}

#[tokio::test]
async fn test_bootstrap_prefers_source_values() {
    let store = LayeredStore::from_defaults(table(&[("a", Value::from(1i64))]));
    let source = Recording::new(table(&[("a", Value::from(5i64))]), true);

    store.bootstrap(source.as_ref()).await.unwrap();
    let written = source.written.lock().clone().unwrap();
    assert_eq!(written["a"].clone().into_int().unwrap(), 5);
}

#[tokio::test]
async fn test_bootstrap_tolerates_read_only_source() {
    let store = LayeredStore::from_defaults(table(&[("a", Value::from(1i64))]));
    let source = Recording::new(table(&[("b", Value::from(2i64))]), false);

    tokio_test::assert_ok!(store.bootstrap(source.as_ref()).await);
    assert!(source.written.lock().is_none());
}

#[tokio::test]
async fn test_bootstrap_read_failure_is_fatal() {
    let store = base_with_port();
    let err = store.bootstrap(&Unreachable).await.unwrap_err();
    assert!(matches!(err, ConfigError::SourceRead { .. }));
}

#[tokio::test]
async fn test_bootstrap_write_failure_is_returned() {
    let store = LayeredStore::from_defaults(table(&[("a", Value::from(1i64))]));
    let err = store.bootstrap(&RejectsWrites).await.unwrap_err();
    assert!(!err.is_unsupported());
    assert!(matches!(err, ConfigError::Write { .. }));
}

#[tokio::test]
async fn test_mixed_case_kv_keys_are_all_visible() {
    let kv = Arc::new(MemoryKv::new());
    kv.put("svc/Kafka/Brokers", "remote:9092");
    kv.put("svc/kafka/partition", "5");

    for _ in 0..20 {
        let store = LayeredStore::builder()
            .with_overlay(KvSource::new("svc", Arc::clone(&kv)))
            .build()
            .await
            .unwrap();
        assert_eq!(store.get_string_slice("kafka.brokers"), vec!["remote:9092"]);
        assert_eq!(store.get_int("kafka.partition"), 5);
    }
}

#[tokio::test]
async fn test_bootstrap_keeps_mixed_case_remote_values() {
    let store = LayeredStore::from_defaults(kafka(&["default:9092"]));
    let kv = Arc::new(MemoryKv::new());
    kv.put("svc/Kafka/Brokers", "remote:9092");

    let source = KvSource::new("svc", Arc::clone(&kv));
    store.bootstrap(&source).await.unwrap();

    // The lower-cased twin carries the remote value, never the file default
    assert_eq!(kv.read("svc/kafka/brokers").unwrap(), b"remote:9092");
    assert_eq!(kv.read("svc/Kafka/Brokers").unwrap(), b"remote:9092");

    store.load_from_provider(Arc::new(source)).await.unwrap();
    assert_eq!(store.get_string_slice("kafka.brokers"), vec!["remote:9092"]);
}

#[tokio::test]
async fn test_failed_provider_leaves_store_untouched() {
    let store = base_with_port();
    store
        .load_from_provider(Recording::new(kafka(&["host:9092"]), false))
        .await
        .unwrap();

    let err = store
        .load_from_provider(Arc::new(Unreachable))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unreachable"));
    assert_eq!(store.overlay_count(), 1);
    assert_eq!(store.get_string_slice("kafka.brokers"), vec!["host:9092"]);
}

#[tokio::test]
async fn test_base_layer_from_file_and_env() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("billing.yaml"),
        r#"
app:
  port: 8080
  name: billing
kafka:
  brokers:
    - kafka:9092
"#,
    )
    .unwrap();

    unsafe {
        std::env::set_var("OVLSTORE_APP__PORT", "9090");
    }

    let store = LayeredStore::from_options(&BaseOptions {
        config_dir: temp_dir.path().to_path_buf(),
        file_name: "billing".to_string(),
        env_prefix: Some("OVLSTORE".to_string()),
        ..BaseOptions::default()
    })
    .unwrap();

    assert_eq!(store.get_int("app.port"), 9090);
    assert_eq!(store.get_string("app.name"), "billing");
    assert_eq!(store.get_string_slice("kafka.brokers"), vec!["kafka:9092"]);

    // Environment values never reach backing stores through bootstrap
    let kv = Arc::new(MemoryKv::new());
    store
        .bootstrap(&KvSource::new("billing", Arc::clone(&kv)))
        .await
        .unwrap();
    assert_eq!(kv.read("billing/app/port").unwrap(), b"8080");
    assert_eq!(kv.read("billing/kafka/brokers").unwrap(), b"kafka:9092");

    unsafe {
        std::env::remove_var("OVLSTORE_APP__PORT");
    }
}

#[tokio::test]
async fn test_load_base_reports_format_errors() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("broken.json"), "{ nope").unwrap();

    let err = LayeredStore::load_base(temp_dir.path(), "broken").unwrap_err();
    assert!(matches!(err, ConfigError::Format(_)));
}

#[tokio::test]
async fn test_kv_overlays_layer_by_prefix() {
    let kv = Arc::new(MemoryKv::new());
    kv.put("shared/kafka/brokers", "shared:9092");
    kv.put("shared/s3/host", "s3.local");
    kv.put("billing/kafka/brokers", "billing:9092,billing:9093");

    let store = LayeredStore::builder()
        .with_overlay(KvSource::new("shared", Arc::clone(&kv)))
        .with_overlay(KvSource::new("billing", Arc::clone(&kv)))
        .build()
        .await
        .unwrap();

    assert_eq!(
        store.get_string_slice("kafka.brokers"),
        vec!["billing:9092", "billing:9093"]
    );
    assert_eq!(store.get_string("s3.host"), "s3.local");
}
