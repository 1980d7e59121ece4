//! Integration tests for live updates and subscriber reconciliation.

use async_trait::async_trait;
use config::{Map, Value};
use overlay_config::core::ConfigData;
use overlay_config::prelude::*;
use overlay_config::sources::kv::WatchOptions;
use overlay_config::sources::{KvSource, MemoryKv, OnChange};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Source whose deliveries are pushed by the test.
#[derive(Default)]
struct Manual {
    on_change: Mutex<Option<OnChange>>,
    closes: AtomicUsize,
}

impl Manual {
    fn push(&self, data: ConfigData) {
        let callback = self.on_change.lock().clone();
        if let Some(callback) = callback {
            callback(data);
        }
    }
}

#[async_trait]
impl ConfigurationSource for Manual {
    async fn get(&self) -> Result<ConfigData> {
        Ok(ConfigData::new())
    }

    async fn watch(&self, _cancel: CancellationToken, on_change: OnChange) -> Result<()> {
        *self.on_change.lock() = Some(on_change);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        "manual".to_string()
    }
}

struct BrokenWatch;

#[async_trait]
impl ConfigurationSource for BrokenWatch {
    async fn get(&self) -> Result<ConfigData> {
        let mut data = Map::new();
        data.insert("mode".to_string(), Value::from("static"));
        Ok(data)
    }

    async fn watch(&self, _cancel: CancellationToken, _on_change: OnChange) -> Result<()> {
        Err(ConfigError::Watch("registration refused".to_string()))
    }

    fn name(&self) -> String {
        "broken".to_string()
    }
}

/// Source that serves a snapshot but has no live updates.
struct Snapshot;

#[async_trait]
impl ConfigurationSource for Snapshot {
    async fn get(&self) -> Result<ConfigData> {
        Ok(entry("region", "eu-west"))
    }

    fn name(&self) -> String {
        "snapshot".to_string()
    }
}

/// Subscriber that runs a closure on every pass.
struct Hook<F> {
    name: String,
    on_pass: F,
}

impl<F: Fn() + Send + Sync> ConfigSubscriber for Hook<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_update(&self) -> Result<bool> {
        (self.on_pass)();
        Ok(true)
    }
}

fn hook(name: &str, on_pass: impl Fn() + Send + Sync + 'static) -> Arc<dyn ConfigSubscriber> {
    Arc::new(Hook {
        name: name.to_string(),
        on_pass,
    })
}

fn entry(key: &str, value: &str) -> ConfigData {
    let mut data = Map::new();
    data.insert(key.to_string(), Value::from(value));
    data
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[derive(Debug, Clone, PartialEq)]
struct Feature {
    mode: String,
}

#[tokio::test]
async fn test_delivery_updates_store_and_watchers() {
    let store = LayeredStore::from_defaults(entry("mode", "off"));
    let source = Arc::new(Manual::default());
    store.load_from_provider(source.clone()).await.unwrap();

    let feature = store
        .watcher("feature", |cfg| Feature {
            mode: cfg.get_string("mode"),
        })
        .unwrap();
    let refreshed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshed);
    feature.on_refresh(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let untouched = store
        .watcher("untouched", |cfg| cfg.get_string("other"))
        .unwrap();
    let untouched_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&untouched_calls);
    untouched.on_refresh(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    store.watch(CancellationToken::new()).await;
    source.push(entry("mode", "on"));

    assert_eq!(store.get_string("mode"), "on");
    eventually("feature refresh", || feature.get().mode == "on").await;
    assert_eq!(refreshed.load(Ordering::SeqCst), 1);
    assert_eq!(untouched_calls.load(Ordering::SeqCst), 0);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_refresh_keeps_last_known_good() {
    let store = LayeredStore::from_defaults(entry("mode", "safe"));
    let source = Arc::new(Manual::default());
    store.load_from_provider(source.clone()).await.unwrap();

    let feature = store
        .watcher("feature", |cfg| Feature {
            mode: cfg.get_string("mode"),
        })
        .unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    feature.on_refresh(move |next| {
        counter.fetch_add(1, Ordering::SeqCst);
        if next.mode == "dangerous" {
            Err("mode not allowed".into())
        } else {
            Ok(())
        }
    });

    store.watch(CancellationToken::new()).await;
    source.push(entry("mode", "dangerous"));

    eventually("rejected refresh", || attempts.load(Ordering::SeqCst) >= 1).await;
    assert_eq!(feature.get().mode, "safe");
    // The store itself holds the new value; only the watcher refused it
    assert_eq!(store.get_string("mode"), "dangerous");

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_stop_others() {
    let store = LayeredStore::from_defaults(entry("mode", "a"));
    let source = Arc::new(Manual::default());
    store.load_from_provider(source.clone()).await.unwrap();

    let fragile = store
        .watcher("fragile", |cfg| {
            let mode = cfg.get_string("mode");
            assert_ne!(mode, "b", "fragile cannot handle mode b");
            mode
        })
        .unwrap();
    let sturdy = store
        .watcher("sturdy", |cfg| cfg.get_string("mode"))
        .unwrap();

    store.watch(CancellationToken::new()).await;
    source.push(entry("mode", "b"));

    eventually("sturdy refresh", || *sturdy.get() == "b").await;
    assert_eq!(*fragile.get(), "a");

    let report = store.reconcile();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "fragile");

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_watch_failures_are_contained() {
    let store = LayeredStore::from_defaults(ConfigData::new());
    store.load_from_provider(Arc::new(BrokenWatch)).await.unwrap();
    let manual = Arc::new(Manual::default());
    store.load_from_provider(manual.clone()).await.unwrap();

    store.watch(CancellationToken::new()).await;

    // The broken source keeps its snapshot; the healthy one still delivers
    assert_eq!(store.get_string("mode"), "static");
    manual.push(entry("mode", "live"));
    assert_eq!(store.get_string("mode"), "live");

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_sources_without_watch_are_skipped() {
    let store = LayeredStore::from_defaults(ConfigData::new());
    store.load_from_provider(Arc::new(Snapshot)).await.unwrap();
    let manual = Arc::new(Manual::default());
    store.load_from_provider(manual.clone()).await.unwrap();

    let mode = store.watcher("mode", |cfg| cfg.get_string("mode")).unwrap();
    store.watch(CancellationToken::new()).await;

    manual.push(entry("mode", "live"));
    eventually("mode refresh", || *mode.get() == "live").await;
    assert_eq!(store.get_string("region"), "eu-west");

    store.close().await.unwrap();
}

#[test]
fn test_reconcile_runs_subscribers_concurrently() {
    let store = LayeredStore::from_defaults(ConfigData::new());
    // Both subscribers must be inside try_update at once to get past the barrier
    let barrier = Arc::new(Barrier::new(2));
    for name in ["left", "right"] {
        let barrier = Arc::clone(&barrier);
        store.subscribe(hook(name, move || {
            barrier.wait();
        }));
    }

    let (done_tx, done_rx) = mpsc::channel();
    let pass = store.clone();
    thread::spawn(move || {
        let _ = done_tx.send(pass.reconcile());
    });

    let report = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("subscribers ran one after another");
    assert_eq!(report.applied.len(), 2);
}

#[test]
fn test_reconcile_waits_for_slowest_subscriber() {
    let store = LayeredStore::from_defaults(ConfigData::new());
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    store.subscribe(hook("fast", || {}));
    store.subscribe(hook("slow", move || {
        thread::sleep(Duration::from_millis(200));
        flag.store(true, Ordering::SeqCst);
    }));

    let started = Instant::now();
    let report = store.reconcile();
    assert!(finished.load(Ordering::SeqCst));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(report.applied.len(), 2);
}

#[test]
fn test_subscribe_waits_for_pass_in_flight() {
    let store = LayeredStore::from_defaults(ConfigData::new());
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    store.subscribe(hook("gate", move || {
        let _ = entered_tx.lock().send(());
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
    }));

    let pass = store.clone();
    let reconciling = thread::spawn(move || pass.reconcile());
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("pass started");

    let registered = Arc::new(AtomicBool::new(false));
    let late = store.clone();
    let flag = Arc::clone(&registered);
    let subscribing = thread::spawn(move || {
        late.subscribe(hook("late", || {}));
        flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!registered.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    let report = reconciling.join().unwrap();
    subscribing.join().unwrap();
    assert!(registered.load(Ordering::SeqCst));
    // The late subscriber joined after the pass and was not part of it
    assert_eq!(report.applied, vec!["gate".to_string()]);
}

#[tokio::test]
async fn test_close_is_idempotent_and_drops_late_deliveries() {
    let store = LayeredStore::from_defaults(entry("mode", "base"));
    let source = Arc::new(Manual::default());
    store.load_from_provider(source.clone()).await.unwrap();
    store.watch(CancellationToken::new()).await;

    source.push(entry("mode", "before"));
    store.close().await.unwrap();
    store.close().await.unwrap();
    assert_eq!(source.closes.load(Ordering::SeqCst), 1);

    source.push(entry("mode", "after"));
    assert_eq!(store.get_string("mode"), "before");
}

#[tokio::test]
async fn test_kv_changes_reach_watchers() {
    let kv = Arc::new(MemoryKv::new());
    kv.put("billing/pool/size", "4");

    let source = KvSource::new("billing", Arc::clone(&kv)).with_watch_options(WatchOptions {
        wait: Duration::from_secs(5),
        ..WatchOptions::default()
    });
    let store = LayeredStore::builder()
        .with_overlay(source)
        .build()
        .await
        .unwrap();

    let pool = store.watcher("pool", |cfg| cfg.get_int("pool.size")).unwrap();
    assert_eq!(*pool.get(), 4);

    let cancel = CancellationToken::new();
    store.watch(cancel.clone()).await;

    kv.put("billing/pool/size", "16");
    eventually("pool resize", || *pool.get() == 16).await;

    cancel.cancel();
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_configurer_trait_object() {
    let store = LayeredStore::from_defaults(entry("mode", "x"));
    let configurer: Arc<dyn Configurer> = Arc::new(store.clone());

    assert_eq!(configurer.get_string("mode"), "x");
    configurer.watch(CancellationToken::new()).await;
    configurer.close().await.unwrap();
    configurer.close().await.unwrap();
}
