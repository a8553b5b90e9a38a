//! Helper types for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use vigil::channels::{Channel, DispatchError, Notification, NotificationKind};
use vigil::collectors::{CollectionError, Collector, PartialSnapshot};
use vigil::config::{ChannelsConfig, ResolvedConfig, StorageConfig, Thresholds};
use vigil::monitors::MonitoringCycle;
use vigil::storage::MetricsStore;
use vigil::{AlertId, ServiceState};

pub const HOST: &str = "web-01";

pub fn test_config() -> ResolvedConfig {
    ResolvedConfig {
        host: HOST.to_string(),
        interval: Duration::from_secs(300),
        critical_services: BTreeSet::from(["sshd".to_string()]),
        thresholds: Thresholds {
            cpu: 90.0,
            memory: 85.0,
            disk: 90.0,
        },
        channels: ChannelsConfig::default(),
        notify_recovery: true,
        collector_timeout: Duration::from_millis(200),
        dispatch_timeout: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(200),
        storage: StorageConfig::None,
    }
}

/// 2024-05-01 12:00 UTC plus `minutes`
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

/// Collector whose next result is set by the test
#[derive(Default)]
pub struct FakeCollector {
    next: Mutex<PartialSnapshot>,
}

impl FakeCollector {
    pub fn set(&self, partial: PartialSnapshot) {
        *self.next.lock().unwrap() = partial;
    }

    pub fn set_gauges(&self, cpu: f64, memory: f64) {
        self.set(PartialSnapshot {
            cpu_percent: Some(cpu),
            memory_percent: Some(memory),
            memory_available_gb: Some(4.0),
            ..Default::default()
        });
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn name(&self) -> &str {
        "fake"
    }

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        Ok(self.next.lock().unwrap().clone())
    }
}

/// Collector that reports service states set by the test
#[derive(Default)]
pub struct FakeServices {
    states: Mutex<BTreeMap<String, ServiceState>>,
}

impl FakeServices {
    pub fn set(&self, service: &str, state: ServiceState) {
        self.states.lock().unwrap().insert(service.to_string(), state);
    }
}

#[async_trait]
impl Collector for FakeServices {
    fn name(&self) -> &str {
        "services"
    }

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        Ok(PartialSnapshot {
            service_states: self.states.lock().unwrap().clone(),
            ..Default::default()
        })
    }
}

/// Collector that answers only after `delay`
pub struct SlowCollector {
    pub name: &'static str,
    pub delay: Duration,
    pub partial: PartialSnapshot,
}

#[async_trait]
impl Collector for SlowCollector {
    fn name(&self) -> &str {
        self.name
    }

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.partial.clone())
    }
}

pub struct FailingCollector;

#[async_trait]
impl Collector for FailingCollector {
    fn name(&self) -> &str {
        "failing"
    }

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        Err(CollectionError::failed("failing", "collector exploded"))
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(NotificationKind, AlertId)>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<(NotificationKind, AlertId)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((notification.kind, notification.alert.id.clone()));
        Ok(true)
    }
}

/// Channel whose endpoint always refuses
pub struct FailingChannel;

#[async_trait]
impl Channel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _: &Notification) -> Result<bool, DispatchError> {
        Err(DispatchError::Refused)
    }
}

pub fn build_cycle(
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<dyn MetricsStore>,
    channels: Vec<Arc<dyn Channel>>,
) -> MonitoringCycle {
    build_cycle_with(test_config(), collectors, store, channels)
}

pub fn build_cycle_with(
    config: ResolvedConfig,
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<dyn MetricsStore>,
    channels: Vec<Arc<dyn Channel>>,
) -> MonitoringCycle {
    MonitoringCycle::new(Arc::new(config), collectors, store, channels)
}
