//! Example demonstrating typed watchers and refresh callbacks.
//!
//! This example shows how to:
//! - Materialize a typed view of the store with a watcher
//! - Accept or reject new values in a refresh callback
//! - Keep the last good value when a refresh is rejected
//!
//! Run with: cargo run --example refresh_callback

use async_trait::async_trait;
use config::{Map, Value};
use overlay_config::core::ConfigData;
use overlay_config::prelude::*;
use overlay_config::sources::OnChange;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
struct RateLimit {
    per_second: i64,
    burst: i64,
}

/// In-process source an operator pushes snapshots into.
#[derive(Default)]
struct Console {
    on_change: Mutex<Option<OnChange>>,
}

impl Console {
    fn publish(&self, per_second: i64, burst: i64) {
        let callback = self.on_change.lock().clone();
        if let Some(callback) = callback {
            callback(limits(per_second, burst));
        }
    }
}

#[async_trait]
impl ConfigurationSource for Console {
    async fn get(&self) -> Result<ConfigData> {
        Ok(ConfigData::new())
    }

    async fn watch(&self, _cancel: CancellationToken, on_change: OnChange) -> Result<()> {
        *self.on_change.lock() = Some(on_change);
        Ok(())
    }

    fn name(&self) -> String {
        "console".to_string()
    }
}

fn limits(per_second: i64, burst: i64) -> ConfigData {
    let mut limit = Map::new();
    limit.insert("per_second".to_string(), Value::from(per_second));
    limit.insert("burst".to_string(), Value::from(burst));
    let mut data = Map::new();
    data.insert("rate_limit".to_string(), Value::from(limit));
    data
}

async fn settle(refreshes: &AtomicUsize, expected: usize) {
    for _ in 0..50 {
        if refreshes.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Refresh Callback Example ===\n");

    let store = LayeredStore::from_defaults(limits(100, 20));
    let console = Arc::new(Console::default());
    store.load_from_provider(console.clone()).await?;

    let rate_limit = store.watcher("rate-limit", |cfg| RateLimit {
        per_second: cfg.get_int("rate_limit.per_second"),
        burst: cfg.get_int("rate_limit.burst"),
    })?;
    println!("Initial: {:?}", rate_limit.get());

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    rate_limit.on_refresh(move |next| {
        counter.fetch_add(1, Ordering::SeqCst);
        if next.burst > next.per_second {
            println!("  rejected {:?}: burst above rate", next);
            return Err("burst must not exceed the per-second rate".into());
        }
        println!("  accepted {:?}", next);
        Ok(())
    });

    store.watch(CancellationToken::new()).await;

    println!("\nPublishing a valid limit...");
    console.publish(200, 50);
    settle(&refreshes, 1).await;
    println!("Current: {:?}", rate_limit.get());

    println!("\nPublishing an invalid limit...");
    console.publish(10, 500);
    settle(&refreshes, 2).await;
    println!("Current: {:?} (last good value kept)", rate_limit.get());

    store.close().await?;
    Ok(())
}
