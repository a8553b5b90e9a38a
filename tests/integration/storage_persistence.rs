//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Snapshots survive a round-trip through the database
//! - Active alerts are picked up again after a restart
//! - Hourly aggregation skips empty hours
//! - Retention cleanup removes old snapshots but keeps alerts
//! - Concurrent writers and readers leave no duplicate or missing rows

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use vigil::channels::{Channel, NotificationKind};
use vigil::collectors::Collector;
use vigil::storage::sqlite::SqliteStore;
use vigil::storage::{AlertTransition, MetricsStore};
use vigil::{Alert, ConditionKind, MetricSnapshot, ServiceState};

use crate::helpers::{FakeCollector, RecordingChannel, at, build_cycle};

#[tokio::test]
async fn test_snapshot_round_trip() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("metrics.db")).await.unwrap();

    let snapshot = MetricSnapshot {
        cpu_percent: Some(42.5),
        memory_percent: Some(61.25),
        memory_available_gb: Some(3.75),
        disk_usage_percent: None,
        service_states: BTreeMap::from([
            ("cron".to_string(), ServiceState::NotFound),
            ("sshd".to_string(), ServiceState::Running),
        ]),
        ..MetricSnapshot::empty(at(0))
    };
    store.append_snapshot(&snapshot).await.unwrap();

    let stored = store.query_range(at(0), at(1)).await.unwrap();
    assert_eq!(stored, vec![snapshot.clone()]);
    assert_eq!(store.latest_snapshot().await.unwrap(), Some(snapshot));
    assert!(store.query_range(at(1), at(2)).await.unwrap().is_empty());

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_restart_resumes_active_alerts() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("metrics.db");
    let collector = Arc::new(FakeCollector::default());
    collector.set_gauges(95.0, 40.0);

    let first_channel = Arc::new(RecordingChannel::default());
    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        let cycle = build_cycle(
            vec![collector.clone() as Arc<dyn Collector>],
            store.clone(),
            vec![first_channel.clone() as Arc<dyn Channel>],
        );
        cycle.run_cycle_at(at(0)).await.unwrap();
        store.close().await.unwrap();
    }
    assert_eq!(first_channel.count(NotificationKind::Raised), 1);

    // same condition after the restart is a repeat, not a new alert
    let second_channel = Arc::new(RecordingChannel::default());
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let cycle = build_cycle(
        vec![collector.clone() as Arc<dyn Collector>],
        store.clone(),
        vec![second_channel.clone() as Arc<dyn Channel>],
    );
    let report = cycle.run_cycle_at(at(5)).await.unwrap();

    assert!(report.raised.is_empty());
    assert_eq!(report.repeated.len(), 1);
    assert!(second_channel.sent().is_empty());

    let active = store.active_alerts(at(0)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].first_observed, at(0));
    assert_eq!(active[0].last_observed, at(5));

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_recurrence_starts_new_lifetime() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("metrics.db")).await.unwrap();

    let mut alert = Alert::raise(ConditionKind::HighDisk, "web-01", "disk full".to_string(), at(0));
    store.append_or_update_alert(&alert).await.unwrap();

    alert.resolved = true;
    alert.resolved_at = Some(at(10));
    store.append_or_update_alert(&alert).await.unwrap();
    assert!(store.active_alerts(at(0)).await.unwrap().is_empty());

    let again = Alert::raise(ConditionKind::HighDisk, "web-01", "disk full".to_string(), at(30));
    store.append_or_update_alert(&again).await.unwrap();

    let active = store.active_alerts(at(0)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].first_observed, at(30));
    assert_eq!(active[0].resolved_at, None);

    let transitions: Vec<_> = store
        .alert_history(at(0))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.transition)
        .collect();
    assert_eq!(
        transitions,
        vec![
            AlertTransition::Raised,
            AlertTransition::Resolved,
            AlertTransition::Raised
        ]
    );

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_sparse_hourly_aggregation() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("metrics.db")).await.unwrap();

    // snapshots in hours 1 and 3 only
    for (minutes, cpu) in [(60, 20.0), (80, 40.0), (185, 70.0)] {
        let snapshot = MetricSnapshot {
            cpu_percent: Some(cpu),
            memory_percent: Some(50.0),
            ..MetricSnapshot::empty(at(minutes))
        };
        store.append_snapshot(&snapshot).await.unwrap();
    }

    let buckets = store.aggregate_hourly(at(0)).await.unwrap();

    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].hour, at(60));
    assert_eq!(buckets[0].sample_count, 2);
    assert_eq!(buckets[0].avg_cpu, Some(30.0));
    assert_eq!(buckets[0].max_cpu, Some(40.0));
    assert_eq!(buckets[1].hour, at(180));
    assert_eq!(buckets[1].sample_count, 1);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_keeps_alerts() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("metrics.db")).await.unwrap();

    for minutes in [0, 5, 10] {
        store
            .append_snapshot(&MetricSnapshot::empty(at(minutes)))
            .await
            .unwrap();
    }
    store
        .append_or_update_alert(&Alert::raise(
            ConditionKind::ServiceDown,
            "sshd",
            "Service sshd is failed on web-01".to_string(),
            at(0),
        ))
        .await
        .unwrap();

    let deleted = store.cleanup_old_snapshots(at(10)).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(store.query_range(at(0), at(60)).await.unwrap().len(), 1);
    assert_eq!(store.active_alerts(at(0)).await.unwrap().len(), 1);
    assert!(store.health_check().await.unwrap().healthy);

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(temp_dir.path().join("metrics.db")).await.unwrap());

    let mut writes = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        writes.push(tokio::spawn(async move {
            let snapshot = MetricSnapshot {
                cpu_percent: Some(i as f64),
                ..MetricSnapshot::empty(at(i))
            };
            store.append_snapshot(&snapshot).await
        }));
    }
    // every writer upserts the same condition
    for i in 0..10 {
        let store = store.clone();
        writes.push(tokio::spawn(async move {
            let mut alert = Alert::raise(
                ConditionKind::HighCpu,
                "web-01",
                format!("CPU usage report {i}"),
                at(0),
            );
            alert.last_observed = at(i);
            store.append_or_update_alert(&alert).await
        }));
    }

    let mut reads = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        reads.push(tokio::spawn(async move {
            let snapshots = store.query_range(at(0), at(60)).await.unwrap();
            let active = store.active_alerts(at(0)).await.unwrap();
            (snapshots.len(), active.len())
        }));
    }

    for result in join_all(writes).await {
        result.unwrap().unwrap();
    }
    for result in join_all(reads).await {
        let (snapshots, active) = result.unwrap();
        assert!(snapshots <= 20);
        assert!(active <= 1);
    }

    let snapshots = store.query_range(at(0), at(60)).await.unwrap();
    assert_eq!(snapshots.len(), 20);
    assert!(snapshots.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    let active = store.active_alerts(at(0)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].first_observed, at(0));

    let history = store.alert_history(at(0)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].transition, AlertTransition::Raised);

    store.close().await.unwrap();
}
