//! Scheduler behaviour with real timers and in-memory storage

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use vigil::actors::{SchedulerHandle, SchedulerSettings};
use vigil::collectors::{CollectionError, Collector, PartialSnapshot};
use vigil::storage::{MemoryStore, MetricsStore, StorageError};

use crate::helpers::{FakeCollector, build_cycle};

/// Records the highest number of collect calls running at once
#[derive(Default)]
struct OverlapCounter {
    running: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl Collector for OverlapCounter {
    fn name(&self) -> &str {
        "overlap"
    }

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(PartialSnapshot::default())
    }
}

fn settings(interval: Duration) -> SchedulerSettings {
    SchedulerSettings {
        interval,
        shutdown_grace: Duration::from_millis(500),
        retention: None,
    }
}

#[tokio::test]
async fn test_cycles_never_overlap() {
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(OverlapCounter::default());
    let cycle = build_cycle(vec![counter.clone() as Arc<dyn Collector>], store, Vec::new());

    // ticks every 30ms while each cycle takes at least 120ms
    let handle = SchedulerHandle::spawn(Arc::new(cycle), settings(Duration::from_millis(30)));
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stats = handle.stats().await.unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(counter.max_seen.load(Ordering::SeqCst), 1);
    assert!(stats.cycles_completed >= 2, "expected several cycles, got {stats:?}");
    assert!(stats.ticks_skipped >= 1);
    assert_eq!(stats.cycles_failed, 0);
}

#[tokio::test]
async fn test_subscribers_receive_reports() {
    let store = Arc::new(MemoryStore::new());
    let collector = Arc::new(FakeCollector::default());
    collector.set_gauges(99.0, 10.0);
    let cycle = build_cycle(vec![collector as Arc<dyn Collector>], store, Vec::new());
    let mut reports = cycle.subscribe();

    let handle = SchedulerHandle::spawn(Arc::new(cycle), settings(Duration::from_secs(3600)));
    let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
        .await
        .unwrap()
        .unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(report.snapshot.cpu_percent, Some(99.0));
    assert_eq!(report.raised.len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_store() {
    let store = Arc::new(MemoryStore::new());
    let cycle = build_cycle(Vec::new(), store.clone(), Vec::new());

    let handle = SchedulerHandle::spawn(Arc::new(cycle), settings(Duration::from_secs(3600)));
    handle.run_now().await.ok();
    handle.shutdown().await.unwrap();

    assert!(matches!(
        store.latest_snapshot().await,
        Err(StorageError::Closed)
    ));
    assert!(handle.run_now().await.is_err());
}
