//! Row types returned by the store's query surface
//!
//! Snapshots and alerts are stored as the crate's own model types
//! ([`crate::MetricSnapshot`], [`crate::Alert`]). This module holds the
//! shapes that only exist as query results.
//!
//! ## Persisted layout
//!
//! - `snapshots` - aggregate gauges as typed columns, service states as JSON
//!   (`service_states_json`) since the set of services is configurable
//! - `alerts` - one row per `(condition, subject)`, updated in place
//! - `alert_events` - append-only transition log
//!
//! All timestamps are stored as Unix milliseconds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AlertId, Severity};

/// One hour of aggregated snapshots.
///
/// Hours without any snapshot are not represented at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyBucket {
    /// Start of the hour (minutes, seconds and millis truncated)
    pub hour: DateTime<Utc>,
    pub avg_cpu: Option<f64>,
    pub max_cpu: Option<f64>,
    pub avg_memory: Option<f64>,
    pub max_memory: Option<f64>,
    pub sample_count: u64,
}

/// Lifecycle transition of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTransition {
    Raised,
    Resolved,
}

impl fmt::Display for AlertTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertTransition::Raised => write!(f, "raised"),
            AlertTransition::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for AlertTransition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raised" => Ok(AlertTransition::Raised),
            "resolved" => Ok(AlertTransition::Resolved),
            other => Err(format!("unknown alert transition: {other}")),
        }
    }
}

/// Entry of the alert audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Monotonic sequence number, assigned by the store
    pub seq: i64,
    pub alert_id: AlertId,
    pub transition: AlertTransition,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Start of the hour containing `timestamp`.
pub fn truncate_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let millis = timestamp.timestamp_millis();
    let hour_millis = millis - millis.rem_euclid(MILLIS_PER_HOUR);
    DateTime::from_timestamp_millis(hour_millis).unwrap_or(timestamp)
}

pub(crate) const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Decide whether an upsert of `next` over `previous` is a lifecycle
/// transition worth logging.
pub(crate) fn transition_between(
    previous_resolved: Option<bool>,
    next_resolved: bool,
) -> Option<AlertTransition> {
    match (previous_resolved, next_resolved) {
        (None, false) | (Some(true), false) => Some(AlertTransition::Raised),
        (Some(false), true) => Some(AlertTransition::Resolved),
        _ => None,
    }
}
