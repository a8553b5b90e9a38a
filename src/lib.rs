pub mod actors;
pub mod alerts;
pub mod channels;
pub mod collectors;
pub mod config;
pub mod monitors;
pub mod report;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of the host, produced once per monitoring cycle.
///
/// Gauges are `None` when the collector responsible for them failed or timed
/// out during the cycle. An absent value is never reported as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_available_gb: Option<f64>,
    /// Mean usage across all mounted volumes
    pub disk_usage_percent: Option<f64>,
    pub service_states: BTreeMap<String, ServiceState>,
}

impl MetricSnapshot {
    /// A snapshot carrying only a timestamp, every gauge absent.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            memory_percent: None,
            memory_available_gb: None,
            disk_usage_percent: None,
            service_states: BTreeMap::new(),
        }
    }
}

/// State of a monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    Stopped,
    StartPending,
    StopPending,
    ContinuePending,
    PausePending,
    Paused,
    /// The service is not installed on this host
    NotFound,
    /// The state could not be determined
    Error,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::StartPending => "start pending",
            ServiceState::StopPending => "stop pending",
            ServiceState::ContinuePending => "continue pending",
            ServiceState::PausePending => "pause pending",
            ServiceState::Paused => "paused",
            ServiceState::NotFound => "not found",
            ServiceState::Error => "error",
        };
        write!(f, "{text}")
    }
}

/// Kind of condition an alert tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    HighCpu,
    HighMemory,
    HighDisk,
    ServiceDown,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::HighCpu => "high_cpu",
            ConditionKind::HighMemory => "high_memory",
            ConditionKind::HighDisk => "high_disk",
            ConditionKind::ServiceDown => "service_down",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ConditionKind::HighCpu | ConditionKind::ServiceDown => Severity::Critical,
            ConditionKind::HighMemory | ConditionKind::HighDisk => Severity::Warning,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConditionKind::HighCpu => "High CPU usage",
            ConditionKind::HighMemory => "High memory usage",
            ConditionKind::HighDisk => "High disk usage",
            ConditionKind::ServiceDown => "Service down",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_cpu" => Ok(ConditionKind::HighCpu),
            "high_memory" => Ok(ConditionKind::HighMemory),
            "high_disk" => Ok(ConditionKind::HighDisk),
            "service_down" => Ok(ConditionKind::ServiceDown),
            other => Err(format!("unknown condition kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Stable alert identity, `"<condition>:<subject>"`.
///
/// Two violations of the same condition on the same subject always map to the
/// same id, which is what deduplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(kind: ConditionKind, subject: &str) -> Self {
        Self(format!("{}:{}", kind.as_str(), subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted record of one condition's active lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub kind: ConditionKind,
    /// Host name for resource conditions, service name for `ServiceDown`
    pub subject: String,
    pub severity: Severity,
    pub message: String,
    pub first_observed: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Open a new alert observed for the first time at `now`.
    pub fn raise(kind: ConditionKind, subject: &str, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(kind, subject),
            kind,
            subject: subject.to_string(),
            severity: kind.severity(),
            message,
            first_observed: now,
            last_observed: now,
            resolved: false,
            resolved_at: None,
        }
    }
}
