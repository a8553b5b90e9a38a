//! Health report built from the store's query surface
//!
//! The score is a presentation concern: it is derived from the active alerts
//! at report time and never persisted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::storage::{HourlyBucket, MetricsStore, StorageResult};
use crate::{Alert, ConditionKind, MetricSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthGrade {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => HealthGrade::Excellent,
            75..=89 => HealthGrade::Good,
            60..=74 => HealthGrade::Fair,
            40..=59 => HealthGrade::Poor,
            _ => HealthGrade::Critical,
        }
    }
}

impl fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Number of active alerts of one condition kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertCount {
    pub kind: ConditionKind,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub period_hours: u32,
    pub generated_at: DateTime<Utc>,
    pub metrics_timeline: Vec<HourlyBucket>,
    pub active_alerts: Vec<AlertCount>,
    pub health_score: u8,
    pub health_status: HealthGrade,
    pub latest: Option<MetricSnapshot>,
    /// Backend summary from [`MetricsStore::get_stats`]
    pub storage: String,
}

fn penalty(kind: ConditionKind) -> u32 {
    match kind {
        ConditionKind::ServiceDown => 5,
        ConditionKind::HighCpu | ConditionKind::HighMemory | ConditionKind::HighDisk => 10,
    }
}

/// Start from 100 and subtract a fixed penalty per active alert.
pub fn health_score(active: &[Alert]) -> u8 {
    let deducted: u32 = active.iter().map(|a| penalty(a.kind)).sum();
    100u32.saturating_sub(deducted) as u8
}

#[instrument(skip(store))]
pub async fn generate_report(
    store: &dyn MetricsStore,
    hours: u32,
    now: DateTime<Utc>,
) -> StorageResult<HealthReport> {
    let since = now - Duration::hours(i64::from(hours));

    let metrics_timeline = store.aggregate_hourly(since).await?;
    // the score reflects everything still open, however old
    let active = store.active_alerts(DateTime::UNIX_EPOCH).await?;
    let latest = store.latest_snapshot().await?;
    let storage = store.get_stats().await?;

    let mut counts: BTreeMap<ConditionKind, usize> = BTreeMap::new();
    for alert in &active {
        *counts.entry(alert.kind).or_default() += 1;
    }

    let health_score = health_score(&active);
    Ok(HealthReport {
        period_hours: hours,
        generated_at: now,
        metrics_timeline,
        active_alerts: counts
            .into_iter()
            .map(|(kind, count)| AlertCount { kind, count })
            .collect(),
        health_score,
        health_status: HealthGrade::from_score(health_score),
        latest,
        storage,
    })
}
