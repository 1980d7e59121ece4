//! Example layering two key/value prefixes over local defaults and watching
//! them for live changes.
//!
//! This example shows how to:
//! - Build a store from defaults plus a shared and a service prefix
//! - Seed the service prefix with the local defaults
//! - Pick up a remote change through the prefix watch
//!
//! Run with: cargo run --example layered_kv_watch

use config::{Map, Value};
use overlay_config::core::ConfigData;
use overlay_config::prelude::*;
use overlay_config::sources::kv::{KvSource, MemoryKv, WatchOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn defaults() -> ConfigData {
    let mut pool = Map::new();
    pool.insert("size".to_string(), Value::from(4i64));
    pool.insert("timeout".to_string(), Value::from("5s"));

    let mut data = Map::new();
    data.insert("pool".to_string(), Value::from(pool));
    data
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Layered KV Watch Example ===\n");

    let kv = Arc::new(MemoryKv::new());
    kv.put("shared/kafka/brokers", "kafka-1:9092,kafka-2:9092");

    let watch_options = WatchOptions {
        wait: Duration::from_secs(2),
        ..WatchOptions::default()
    };
    let store = LayeredStore::builder()
        .with_defaults(defaults())
        .with_overlay(
            KvSource::new("shared", Arc::clone(&kv)).with_watch_options(watch_options.clone()),
        )
        .with_seeded_overlay(
            KvSource::new("billing", Arc::clone(&kv)).with_watch_options(watch_options),
        )
        .build()
        .await?;

    println!("Seeded keys:");
    for key in ["billing/pool/size", "billing/pool/timeout"] {
        let value = kv.read(key).unwrap_or_default();
        println!("  {} = {}", key, String::from_utf8_lossy(&value));
    }

    println!("\nInitial values:");
    println!("  kafka.brokers = {:?}", store.get_string_slice("kafka.brokers"));
    println!("  pool.size     = {}", store.get_int("pool.size"));
    println!("  pool.timeout  = {:?}", store.get_duration("pool.timeout"));

    let pool_size = store.watcher("pool", |cfg| cfg.get_int("pool.size"))?;

    let cancel = CancellationToken::new();
    store.watch(cancel.clone()).await;

    println!("\nOperator raises billing/pool/size to 16...");
    kv.put("billing/pool/size", "16");

    for _ in 0..50 {
        if *pool_size.get() == 16 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("  pool.size     = {}", pool_size.get());

    cancel.cancel();
    store.close().await?;
    println!("\nStore closed.");
    Ok(())
}
