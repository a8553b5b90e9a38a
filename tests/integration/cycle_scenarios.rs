//! End-to-end cycle scenarios against the in-memory store
//!
//! Each test drives `MonitoringCycle::run_cycle_at` with scripted collectors
//! and checks what was persisted and what was sent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use vigil::channels::{Channel, NotificationKind};
use vigil::collectors::{CollectionError, Collector, PartialSnapshot};
use vigil::monitors::CyclePhase;
use vigil::storage::{AlertTransition, MemoryStore, MetricsStore};
use vigil::{AlertId, ConditionKind, ServiceState};

use crate::helpers::{
    FailingChannel, FailingCollector, FakeCollector, FakeServices, HOST, RecordingChannel,
    SlowCollector, at, build_cycle, build_cycle_with, test_config,
};

#[tokio::test]
async fn test_cpu_spike_raises_once_and_recovers() {
    let store = Arc::new(MemoryStore::new());
    let collector = Arc::new(FakeCollector::default());
    let channel = Arc::new(RecordingChannel::default());
    let cycle = build_cycle(
        vec![collector.clone() as Arc<dyn Collector>],
        store.clone(),
        vec![channel.clone() as Arc<dyn Channel>],
    );
    let cpu_alert = AlertId::new(ConditionKind::HighCpu, HOST);

    collector.set_gauges(95.0, 40.0);
    let first = cycle.run_cycle_at(at(0)).await.unwrap();
    assert_eq!(first.raised.len(), 1);
    assert_eq!(first.raised[0].id, cpu_alert);

    let second = cycle.run_cycle_at(at(5)).await.unwrap();
    assert!(second.raised.is_empty());
    assert_eq!(second.repeated, vec![cpu_alert.clone()]);

    let active = store.active_alerts(at(0)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].first_observed, at(0));
    assert_eq!(active[0].last_observed, at(5));

    collector.set_gauges(50.0, 40.0);
    let third = cycle.run_cycle_at(at(10)).await.unwrap();
    assert_eq!(third.resolved.len(), 1);
    assert_eq!(third.resolved[0].resolved_at, Some(at(10)));

    assert_eq!(
        channel.sent(),
        vec![
            (NotificationKind::Raised, cpu_alert.clone()),
            (NotificationKind::Recovered, cpu_alert.clone()),
        ]
    );
    assert!(store.active_alerts(at(0)).await.unwrap().is_empty());

    let history = store.alert_history(at(0)).await.unwrap();
    let transitions: Vec<_> = history.iter().map(|e| (e.transition, e.at)).collect();
    assert_eq!(
        transitions,
        vec![(AlertTransition::Raised, at(0)), (AlertTransition::Resolved, at(10))]
    );
    assert_eq!(store.query_range(at(0), at(15)).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_disk_timeout_keeps_other_metrics() {
    let store = Arc::new(MemoryStore::new());
    let gauges = Arc::new(FakeCollector::default());
    gauges.set_gauges(95.0, 90.0);
    let disk = Arc::new(SlowCollector {
        name: "disk",
        delay: Duration::from_secs(5),
        partial: PartialSnapshot {
            disk_usage_percent: Some(99.0),
            ..Default::default()
        },
    });
    let cycle = build_cycle(
        vec![gauges as Arc<dyn Collector>, disk as Arc<dyn Collector>],
        store.clone(),
        Vec::new(),
    );

    let report = cycle.run_cycle_at(at(0)).await.unwrap();

    assert_eq!(report.collection_errors.len(), 1);
    assert_matches!(
        &report.collection_errors[0],
        CollectionError::Timeout { collector, .. } if collector == "disk"
    );
    assert_eq!(report.snapshot.disk_usage_percent, None);

    let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![ConditionKind::HighCpu, ConditionKind::HighMemory]);

    let stored = store.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(stored, report.snapshot);
}

#[tokio::test]
async fn test_unobserved_alert_stays_active() {
    let store = Arc::new(MemoryStore::new());
    let collector = Arc::new(FakeCollector::default());
    let cycle = build_cycle(
        vec![collector.clone() as Arc<dyn Collector>],
        store.clone(),
        Vec::new(),
    );

    collector.set(PartialSnapshot {
        disk_usage_percent: Some(97.0),
        ..Default::default()
    });
    cycle.run_cycle_at(at(0)).await.unwrap();

    // disk reading missing from the next snapshot
    collector.set(PartialSnapshot::default());
    let report = cycle.run_cycle_at(at(5)).await.unwrap();

    assert!(report.resolved.is_empty());
    let active = store.active_alerts(at(0)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kind, ConditionKind::HighDisk);
    assert_eq!(active[0].last_observed, at(0));
}

#[tokio::test]
async fn test_service_down_recovers_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let services = Arc::new(FakeServices::default());
    let channel = Arc::new(RecordingChannel::default());
    let cycle = build_cycle(
        vec![services.clone() as Arc<dyn Collector>],
        store.clone(),
        vec![channel.clone() as Arc<dyn Channel>],
    );

    services.set("sshd", ServiceState::Stopped);
    cycle.run_cycle_at(at(0)).await.unwrap();
    cycle.run_cycle_at(at(5)).await.unwrap();

    services.set("sshd", ServiceState::Running);
    cycle.run_cycle_at(at(10)).await.unwrap();
    cycle.run_cycle_at(at(15)).await.unwrap();

    assert_eq!(channel.count(NotificationKind::Raised), 1);
    assert_eq!(channel.count(NotificationKind::Recovered), 1);
    assert!(store.active_alerts(at(0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_channel_does_not_block_others() {
    let store = Arc::new(MemoryStore::new());
    let services = Arc::new(FakeServices::default());
    let recording = Arc::new(RecordingChannel::default());
    let cycle = build_cycle(
        vec![services.clone() as Arc<dyn Collector>],
        store.clone(),
        vec![
            Arc::new(FailingChannel) as Arc<dyn Channel>,
            recording.clone() as Arc<dyn Channel>,
        ],
    );

    services.set("cron", ServiceState::Error);
    let report = cycle.run_cycle_at(at(0)).await.unwrap();

    assert_eq!(report.deliveries.len(), 2);
    let delivered: BTreeMap<_, _> = report
        .deliveries
        .iter()
        .map(|d| (d.channel.as_str(), d.delivered))
        .collect();
    assert_eq!(delivered, BTreeMap::from([("failing", false), ("recording", true)]));
    assert_eq!(recording.count(NotificationKind::Raised), 1);

    // a failed delivery leaves the alert active and is not retried
    assert_eq!(store.active_alerts(at(0)).await.unwrap().len(), 1);
    let next = cycle.run_cycle_at(at(5)).await.unwrap();
    assert!(next.deliveries.is_empty());
}

#[tokio::test]
async fn test_failing_collector_still_stores_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let gauges = Arc::new(FakeCollector::default());
    gauges.set_gauges(10.0, 20.0);
    let cycle = build_cycle(
        vec![
            gauges as Arc<dyn Collector>,
            Arc::new(FailingCollector) as Arc<dyn Collector>,
        ],
        store.clone(),
        Vec::new(),
    );

    let report = cycle.run_cycle_at(at(0)).await.unwrap();

    assert_eq!(report.collection_errors.len(), 1);
    assert_eq!(report.collection_errors[0].collector(), "failing");
    assert!(report.violations.is_empty());
    assert_eq!(store.query_range(at(0), at(1)).await.unwrap(), vec![report.snapshot]);
}

#[tokio::test]
async fn test_storage_failure_aborts_cycle() {
    let store = Arc::new(MemoryStore::new());
    let gauges = Arc::new(FakeCollector::default());
    gauges.set_gauges(95.0, 20.0);
    let channel = Arc::new(RecordingChannel::default());
    let cycle = build_cycle(
        vec![gauges as Arc<dyn Collector>],
        store.clone(),
        vec![channel.clone() as Arc<dyn Channel>],
    );

    store.close().await.unwrap();
    let result = cycle.run_cycle_at(at(0)).await;

    assert!(result.is_err());
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_alert_resolves_once_service_is_no_longer_monitored() {
    let store = Arc::new(MemoryStore::new());
    let services = Arc::new(FakeServices::default());
    services.set("sshd", ServiceState::Stopped);
    let cycle = build_cycle(
        vec![services as Arc<dyn Collector>],
        store.clone(),
        Vec::new(),
    );
    cycle.run_cycle_at(at(0)).await.unwrap();
    assert_eq!(store.active_alerts(at(0)).await.unwrap().len(), 1);

    // restarted with sshd taken out of the monitored set
    let services = Arc::new(FakeServices::default());
    services.set("cron", ServiceState::Running);
    let channel = Arc::new(RecordingChannel::default());
    let config = vigil::config::ResolvedConfig {
        critical_services: BTreeSet::from(["cron".to_string()]),
        ..test_config()
    };
    let cycle = build_cycle_with(
        config,
        vec![services as Arc<dyn Collector>],
        store.clone(),
        vec![channel.clone() as Arc<dyn Channel>],
    );

    let report = cycle.run_cycle_at(at(5)).await.unwrap();
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].subject, "sshd");
    for step in 2..10 {
        cycle.run_cycle_at(at(5 * step)).await.unwrap();
    }

    assert!(store.active_alerts(at(0)).await.unwrap().is_empty());
    assert_eq!(
        channel.sent(),
        vec![(
            NotificationKind::Recovered,
            AlertId::new(ConditionKind::ServiceDown, "sshd")
        )]
    );
}

#[tokio::test]
async fn test_phases_are_published_in_order() {
    let store = Arc::new(MemoryStore::new());
    let gauges = Arc::new(FakeCollector::default());
    gauges.set_gauges(95.0, 20.0);
    let cycle = build_cycle(vec![gauges as Arc<dyn Collector>], store, Vec::new());
    assert_eq!(cycle.phase(), CyclePhase::Idle);

    let mut phases = cycle.watch_phase();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            seen.push(phase);
            if phase == CyclePhase::Idle {
                break;
            }
        }
        seen
    });

    cycle.run_cycle_at(at(0)).await.unwrap();

    assert_eq!(
        watcher.await.unwrap(),
        vec![
            CyclePhase::Collecting,
            CyclePhase::Storing,
            CyclePhase::Evaluating,
            CyclePhase::Dispatching,
            CyclePhase::Idle,
        ]
    );
    assert_eq!(cycle.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_cycles_in_the_same_millisecond_both_store() {
    let store = Arc::new(MemoryStore::new());
    let gauges = Arc::new(FakeCollector::default());
    gauges.set_gauges(10.0, 20.0);
    let cycle = build_cycle(vec![gauges as Arc<dyn Collector>], store.clone(), Vec::new());

    let first = cycle.run_cycle_at(at(0)).await.unwrap();
    let second = cycle.run_cycle_at(at(0)).await.unwrap();
    // clock stepped back
    let third = cycle.run_cycle_at(at(-1)).await.unwrap();

    let one_ms = chrono::Duration::milliseconds(1);
    assert_eq!(first.snapshot.timestamp, at(0));
    assert_eq!(second.snapshot.timestamp, at(0) + one_ms);
    assert_eq!(third.snapshot.timestamp, at(0) + one_ms * 2);
    assert_eq!(store.query_range(at(0), at(1)).await.unwrap().len(), 3);
}
