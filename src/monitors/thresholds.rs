use std::collections::BTreeSet;

use crate::config::Thresholds;
use crate::{Alert, AlertId, ConditionKind, MetricSnapshot};

/// A single threshold breach or service-down condition found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct Violation {
    pub kind: ConditionKind,
    pub subject: String,
    pub message: String,
}

impl Violation {
    pub fn alert_id(&self) -> AlertId {
        AlertId::new(self.kind, &self.subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gauge {
    Cpu,
    Memory,
    Disk,
}

impl Gauge {
    fn kind(self) -> ConditionKind {
        match self {
            Gauge::Cpu => ConditionKind::HighCpu,
            Gauge::Memory => ConditionKind::HighMemory,
            Gauge::Disk => ConditionKind::HighDisk,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Gauge::Cpu => "CPU",
            Gauge::Memory => "memory",
            Gauge::Disk => "disk",
        }
    }

    fn read(self, snapshot: &MetricSnapshot) -> Option<f64> {
        match self {
            Gauge::Cpu => snapshot.cpu_percent,
            Gauge::Memory => snapshot.memory_percent,
            Gauge::Disk => snapshot.disk_usage_percent,
        }
    }

    fn limit(self, thresholds: &Thresholds) -> f64 {
        match self {
            Gauge::Cpu => thresholds.cpu,
            Gauge::Memory => thresholds.memory,
            Gauge::Disk => thresholds.disk,
        }
    }
}

const GAUGES: [Gauge; 3] = [Gauge::Cpu, Gauge::Memory, Gauge::Disk];

/// Find every violated condition in `snapshot`.
///
/// A gauge only violates when it is strictly above its limit; absent gauges
/// never violate. Every service whose state is not `Running` yields a
/// `ServiceDown` violation. Resource conditions use `host` as their subject.
pub fn evaluate(
    snapshot: &MetricSnapshot,
    thresholds: &Thresholds,
    host: &str,
) -> BTreeSet<Violation> {
    let mut violations = BTreeSet::new();

    for gauge in GAUGES {
        let limit = gauge.limit(thresholds);
        if let Some(value) = gauge.read(snapshot)
            && value > limit
        {
            violations.insert(Violation {
                kind: gauge.kind(),
                subject: host.to_string(),
                message: format!(
                    "{} usage {:.1}% exceeds threshold {:.1}% on {}",
                    gauge.name(),
                    value,
                    limit,
                    host
                ),
            });
        }
    }

    for (service, state) in &snapshot.service_states {
        if !state.is_running() {
            violations.insert(Violation {
                kind: ConditionKind::ServiceDown,
                subject: service.clone(),
                message: format!("Service {service} is {state} on {host}"),
            });
        }
    }

    violations
}

/// Whether `snapshot` carries the data needed to decide `alert`'s condition.
///
/// An alert that is not observed must be left as it is: a failed collector says
/// nothing about whether the condition cleared.
pub fn observes(snapshot: &MetricSnapshot, alert: &Alert) -> bool {
    match alert.kind {
        ConditionKind::HighCpu => snapshot.cpu_percent.is_some(),
        ConditionKind::HighMemory => snapshot.memory_percent.is_some(),
        ConditionKind::HighDisk => snapshot.disk_usage_percent.is_some(),
        ConditionKind::ServiceDown => snapshot.service_states.contains_key(&alert.subject),
    }
}
