//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Reports can read while a cycle writes
//! - **Migrations**: Automatic schema versioning with sqlx
//! - **Atomic writes**: every append/upsert runs in its own transaction, so a
//!   crash or a cancelled cycle never leaves a half-written row

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, MetricsStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertEvent, HourlyBucket, MILLIS_PER_HOUR, transition_between};
use crate::{Alert, AlertId, MetricSnapshot};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
    /// Serializes writers so an upsert's read-then-write never interleaves
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use vigil::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./metrics.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            write_lock: Mutex::new(()),
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::CorruptRow(format!("timestamp out of range: {millis}"))
        })
    }

    fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> StorageResult<T> {
        value.parse().map_err(StorageError::CorruptRow)
    }

    fn snapshot_from_row(row: &SqliteRow) -> StorageResult<MetricSnapshot> {
        let states: String = row.try_get("service_states_json")?;
        Ok(MetricSnapshot {
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            cpu_percent: row.try_get("cpu_percent")?,
            memory_percent: row.try_get("memory_percent")?,
            memory_available_gb: row.try_get("memory_available_gb")?,
            disk_usage_percent: row.try_get("disk_usage_percent")?,
            service_states: serde_json::from_str(&states)?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let kind: String = row.try_get("kind")?;
        let kind = Self::parse_column(&kind)?;
        let subject: String = row.try_get("subject")?;
        let severity: String = row.try_get("severity")?;
        let resolved_at: Option<i64> = row.try_get("resolved_at")?;

        Ok(Alert {
            id: AlertId::new(kind, &subject),
            kind,
            subject,
            severity: Self::parse_column(&severity)?,
            message: row.try_get("message")?,
            first_observed: Self::millis_to_timestamp(row.try_get("first_observed")?)?,
            last_observed: Self::millis_to_timestamp(row.try_get("last_observed")?)?,
            resolved: row.try_get("resolved")?,
            resolved_at: resolved_at.map(Self::millis_to_timestamp).transpose()?,
        })
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<AlertEvent> {
        let alert_id: String = row.try_get("alert_id")?;
        let (kind, subject) = alert_id.split_once(':').ok_or_else(|| {
            StorageError::CorruptRow(format!("malformed alert id: {alert_id}"))
        })?;
        let transition: String = row.try_get("transition")?;
        let severity: String = row.try_get("severity")?;

        Ok(AlertEvent {
            seq: row.try_get("seq")?,
            alert_id: AlertId::new(Self::parse_column(kind)?, subject),
            transition: Self::parse_column(&transition)?,
            severity: Self::parse_column(&severity)?,
            message: row.try_get("message")?,
            at: Self::millis_to_timestamp(row.try_get("at")?)?,
        })
    }
}

#[async_trait]
impl MetricsStore for SqliteStore {
    #[instrument(skip_all, fields(timestamp = %snapshot.timestamp))]
    async fn append_snapshot(&self, snapshot: &MetricSnapshot) -> StorageResult<()> {
        let states = serde_json::to_string(&snapshot.service_states)?;
        let _guard = self.write_lock.lock().await;

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                timestamp, cpu_percent, memory_percent, memory_available_gb,
                disk_usage_percent, service_states_json
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&snapshot.timestamp))
        .bind(snapshot.cpu_percent)
        .bind(snapshot.memory_percent)
        .bind(snapshot.memory_available_gb)
        .bind(snapshot.disk_usage_percent)
        .bind(states)
        .execute(&self.pool)
        .await?;

        debug!("snapshot stored");
        Ok(())
    }

    #[instrument(skip_all, fields(alert = %alert.id, resolved = alert.resolved))]
    async fn append_or_update_alert(&self, alert: &Alert) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let previous: Option<(bool,)> = sqlx::query_as("SELECT resolved FROM alerts WHERE id = ?")
            .bind(alert.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, kind, subject, severity, message,
                first_observed, last_observed, resolved, resolved_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                first_observed = CASE
                    WHEN alerts.resolved = 1 AND excluded.resolved = 0
                    THEN excluded.first_observed
                    ELSE alerts.first_observed
                END,
                severity = excluded.severity,
                message = excluded.message,
                last_observed = excluded.last_observed,
                resolved = excluded.resolved,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(alert.id.as_str())
        .bind(alert.kind.as_str())
        .bind(&alert.subject)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(Self::timestamp_to_millis(&alert.first_observed))
        .bind(Self::timestamp_to_millis(&alert.last_observed))
        .bind(alert.resolved)
        .bind(alert.resolved_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&mut *tx)
        .await?;

        if let Some(transition) = transition_between(previous.map(|r| r.0), alert.resolved) {
            let at = if alert.resolved {
                alert.resolved_at.unwrap_or(alert.last_observed)
            } else {
                alert.last_observed
            };
            sqlx::query(
                r#"
                INSERT INTO alert_events (alert_id, transition, severity, message, at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(alert.id.as_str())
            .bind(transition.to_string())
            .bind(alert.severity.as_str())
            .bind(&alert.message)
            .bind(Self::timestamp_to_millis(&at))
            .execute(&mut *tx)
            .await?;
            debug!("recorded {} transition", transition);
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, cpu_percent, memory_percent, memory_available_gb,
                   disk_usage_percent, service_states_json
            FROM snapshots
            WHERE timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(Self::timestamp_to_millis(&start))
        .bind(Self::timestamp_to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        let snapshots = rows
            .iter()
            .map(Self::snapshot_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("query returned {} snapshots", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn latest_snapshot(&self) -> StorageResult<Option<MetricSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT timestamp, cpu_percent, memory_percent, memory_available_gb,
                   disk_usage_percent, service_states_json
            FROM snapshots
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::snapshot_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn aggregate_hourly(&self, since: DateTime<Utc>) -> StorageResult<Vec<HourlyBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT (timestamp / ?) * ? AS hour,
                   AVG(cpu_percent) AS avg_cpu,
                   MAX(cpu_percent) AS max_cpu,
                   AVG(memory_percent) AS avg_memory,
                   MAX(memory_percent) AS max_memory,
                   COUNT(*) AS sample_count
            FROM snapshots
            WHERE timestamp >= ?
            GROUP BY hour
            ORDER BY hour ASC
            "#,
        )
        .bind(MILLIS_PER_HOUR)
        .bind(MILLIS_PER_HOUR)
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get("sample_count")?;
                Ok(HourlyBucket {
                    hour: Self::millis_to_timestamp(row.try_get("hour")?)?,
                    avg_cpu: row.try_get("avg_cpu")?,
                    max_cpu: row.try_get("max_cpu")?,
                    avg_memory: row.try_get("avg_memory")?,
                    max_memory: row.try_get("max_memory")?,
                    sample_count: count.max(0) as u64,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn active_alerts(&self, since: DateTime<Utc>) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, subject, severity, message,
                   first_observed, last_observed, resolved, resolved_at
            FROM alerts
            WHERE resolved = 0 AND last_observed >= ?
            ORDER BY id ASC
            "#,
        )
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn alert_history(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, alert_id, transition, severity, message, at
            FROM alert_events
            WHERE at >= ?
            ORDER BY seq ASC
            "#,
        )
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up snapshots older than {}", before);
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM snapshots WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old snapshots", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (snapshots, oldest, newest): (i64, Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM snapshots")
                .fetch_one(&self.pool)
                .await?;

        let (alerts, active): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN resolved = 0 THEN 1 ELSE 0 END) FROM alerts",
        )
        .fetch_one(&self.pool)
        .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                Self::millis_to_timestamp(old)?.format("%Y-%m-%d"),
                Self::millis_to_timestamp(new)?.format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} snapshots, {} alerts ({} active), {:.2} MB on disk, time range: {}",
            snapshots,
            alerts,
            active.unwrap_or(0),
            file_size_mb,
            time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        let _guard = self.write_lock.lock().await;
        self.pool.close().await;
        Ok(())
    }
}
