//! Metric collectors
//!
//! A collector samples one aspect of the host and returns the part of a
//! [`MetricSnapshot`] it is responsible for. The cycle runs every collector
//! concurrently and merges whatever succeeded; a failed collector only leaves
//! its own fields absent.

pub mod services;
pub mod system;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ResolvedConfig;
use crate::{MetricSnapshot, ServiceState};

pub use services::SystemdServiceCollector;
pub use system::{CpuCollector, DiskCollector, MemoryCollector};

/// Fields contributed by a single collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSnapshot {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_available_gb: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub service_states: BTreeMap<String, ServiceState>,
}

impl PartialSnapshot {
    /// Fold `other` into `self`. Present values in `other` win.
    pub fn merge(&mut self, other: PartialSnapshot) {
        self.cpu_percent = other.cpu_percent.or(self.cpu_percent);
        self.memory_percent = other.memory_percent.or(self.memory_percent);
        self.memory_available_gb = other.memory_available_gb.or(self.memory_available_gb);
        self.disk_usage_percent = other.disk_usage_percent.or(self.disk_usage_percent);
        self.service_states.extend(other.service_states);
    }

    pub fn into_snapshot(self, timestamp: DateTime<Utc>) -> MetricSnapshot {
        MetricSnapshot {
            timestamp,
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            memory_available_gb: self.memory_available_gb,
            disk_usage_percent: self.disk_usage_percent,
            service_states: self.service_states,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum CollectionError {
    /// The collector did not answer within the cycle's collector timeout
    Timeout {
        collector: String,
        #[serde(with = "duration_secs")]
        timeout: Duration,
    },
    /// The collector ran but could not produce a reading
    Failed { collector: String, message: String },
}

impl CollectionError {
    pub fn failed(collector: &str, message: impl Into<String>) -> Self {
        CollectionError::Failed {
            collector: collector.to_string(),
            message: message.into(),
        }
    }

    pub fn collector(&self) -> &str {
        match self {
            CollectionError::Timeout { collector, .. }
            | CollectionError::Failed { collector, .. } => collector,
        }
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Timeout { collector, timeout } => {
                write!(f, "collector '{}' timed out after {:?}", collector, timeout)
            }
            CollectionError::Failed { collector, message } => {
                write!(f, "collector '{}' failed: {}", collector, message)
            }
        }
    }
}

impl std::error::Error for CollectionError {}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Source of one part of a snapshot
#[async_trait]
pub trait Collector: Send + Sync {
    /// Short identifier used in logs and errors
    fn name(&self) -> &str;

    async fn collect(&self) -> Result<PartialSnapshot, CollectionError>;
}

/// The collectors the agent runs when no others are supplied.
pub fn default_collectors(config: &ResolvedConfig) -> Vec<Arc<dyn Collector>> {
    let mut collectors: Vec<Arc<dyn Collector>> = vec![
        Arc::new(CpuCollector),
        Arc::new(MemoryCollector),
        Arc::new(DiskCollector),
    ];
    if !config.critical_services.is_empty() {
        collectors.push(Arc::new(SystemdServiceCollector::new(
            config.critical_services.iter().cloned(),
        )));
    }
    collectors
}
