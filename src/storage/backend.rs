//! Storage backend trait definition
//!
//! This module defines the `MetricsStore` trait that all storage
//! implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AlertEvent, HourlyBucket};
use crate::{Alert, MetricSnapshot};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Durable history of snapshots and alerts
///
/// The store is the only state shared between monitoring cycles. Each write
/// is atomic: a failure (or a cancelled caller) never leaves a partially
/// written row visible to readers.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` and serialize writes internally, as
/// the scheduler, the report command and tests all share one instance.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist a new snapshot
    ///
    /// Fails if the medium is unavailable or a snapshot with the same
    /// timestamp already exists.
    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> StorageResult<()>;

    /// Insert an alert, or update the existing row with the same id
    ///
    /// On conflict `severity`, `message`, `last_observed`, `resolved` and
    /// `resolved_at` are replaced. `first_observed` is kept unless a resolved
    /// alert becomes active again, in which case the new value starts a fresh
    /// lifetime. Raised/resolved transitions are appended to the alert log in
    /// the same transaction.
    async fn append_or_update_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Snapshots with `start <= timestamp < end`, oldest first
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSnapshot>>;

    /// The most recent snapshot, if any
    async fn latest_snapshot(&self) -> StorageResult<Option<MetricSnapshot>>;

    /// Hourly CPU and memory aggregates since `since`, oldest hour first
    ///
    /// Hours without snapshots are omitted. Absent gauges do not count
    /// towards the averages, but the snapshot still counts as a sample.
    async fn aggregate_hourly(&self, since: DateTime<Utc>) -> StorageResult<Vec<HourlyBucket>>;

    /// Unresolved alerts last observed at or after `since`
    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<Alert>>;

    /// Alert transitions at or after `since`, in the order they happened
    async fn alert_history(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertEvent>>;

    /// Delete snapshots older than `before`
    ///
    /// Alerts are never deleted. Returns the number of snapshots removed.
    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats (e.g. "SQLite: 1200 snapshots, ...").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
