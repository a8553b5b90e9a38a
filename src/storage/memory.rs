//! In-memory storage backend (no persistence)
//!
//! Used for `storage.backend = "none"` and in tests. It implements the same
//! semantics as the SQLite backend, including the alert transition log, but
//! all data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MetricsStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertEvent, HourlyBucket, MILLIS_PER_HOUR, transition_between};
use crate::{Alert, AlertId, MetricSnapshot};

#[derive(Default)]
struct Inner {
    /// Snapshots keyed by Unix millis
    snapshots: BTreeMap<i64, MetricSnapshot>,
    alerts: BTreeMap<AlertId, Alert>,
    events: Vec<AlertEvent>,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

/// In-memory storage backend
///
/// All state sits behind a single `RwLock`, so writers are serialized and
/// readers never observe a half-applied upsert.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.ensure_open()?;

        let key = snapshot.timestamp.timestamp_millis();
        if inner.snapshots.contains_key(&key) {
            return Err(StorageError::Query(format!(
                "snapshot at {} already exists",
                snapshot.timestamp
            )));
        }
        inner.snapshots.insert(key, snapshot.clone());
        debug!("stored snapshot at {}", snapshot.timestamp);
        Ok(())
    }

    async fn append_or_update_alert(&self, alert: &Alert) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.ensure_open()?;

        let previous = inner.alerts.get(&alert.id).cloned();
        let transition = transition_between(previous.as_ref().map(|a| a.resolved), alert.resolved);

        let mut stored = alert.clone();
        if let Some(previous) = previous
            && !(previous.resolved && !alert.resolved)
        {
            stored.first_observed = previous.first_observed;
        }
        inner.alerts.insert(alert.id.clone(), stored);

        if let Some(transition) = transition {
            let seq = inner.events.len() as i64 + 1;
            let at = if alert.resolved {
                alert.resolved_at.unwrap_or(alert.last_observed)
            } else {
                alert.last_observed
            };
            inner.events.push(AlertEvent {
                seq,
                alert_id: alert.id.clone(),
                transition,
                severity: alert.severity,
                message: alert.message.clone(),
                at,
            });
        }
        Ok(())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSnapshot>> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;

        let (start, end) = (start.timestamp_millis(), end.timestamp_millis());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(inner.snapshots.range(start..end).map(|(_, s)| s.clone()).collect())
    }

    async fn latest_snapshot(&self) -> StorageResult<Option<MetricSnapshot>> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;
        Ok(inner.snapshots.values().next_back().cloned())
    }

    async fn aggregate_hourly(&self, since: DateTime<Utc>) -> StorageResult<Vec<HourlyBucket>> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;

        let mut hours: BTreeMap<i64, Vec<&MetricSnapshot>> = BTreeMap::new();
        for (millis, snapshot) in inner.snapshots.range(since.timestamp_millis()..) {
            let hour = millis - millis.rem_euclid(MILLIS_PER_HOUR);
            hours.entry(hour).or_default().push(snapshot);
        }

        let buckets = hours
            .into_iter()
            .filter_map(|(hour, snapshots)| {
                let cpu: Vec<f64> = snapshots.iter().filter_map(|s| s.cpu_percent).collect();
                let memory: Vec<f64> = snapshots.iter().filter_map(|s| s.memory_percent).collect();
                Some(HourlyBucket {
                    hour: DateTime::from_timestamp_millis(hour)?,
                    avg_cpu: mean(&cpu),
                    max_cpu: max(&cpu),
                    avg_memory: mean(&memory),
                    max_memory: max(&memory),
                    sample_count: snapshots.len() as u64,
                })
            })
            .collect();
        Ok(buckets)
    }

    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<Alert>> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;

        Ok(inner
            .alerts
            .values()
            .filter(|a| !a.resolved && a.last_observed >= since)
            .cloned()
            .collect())
    }

    async fn alert_history(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertEvent>> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;

        Ok(inner.events.iter().filter(|e| e.at >= since).cloned().collect())
    }

    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        inner.ensure_open()?;

        let keep = inner.snapshots.split_off(&before.timestamp_millis());
        let deleted = inner.snapshots.len();
        inner.snapshots = keep;
        debug!("deleted {} old snapshots", deleted);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: !inner.closed,
            message: if inner.closed {
                "In-memory storage closed".to_string()
            } else {
                "In-memory storage operational".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("snapshots".to_string(), inner.snapshots.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        let active = inner.alerts.values().filter(|a| !a.resolved).count();
        Ok(format!(
            "In-Memory: {} snapshots, {} alerts ({} active)",
            inner.snapshots.len(),
            inner.alerts.len(),
            active
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.inner.write().await.closed = true;
        Ok(())
    }
}
