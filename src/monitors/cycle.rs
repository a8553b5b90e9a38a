//! One monitoring cycle: collect, store, evaluate, dispatch
//!
//! ```text
//! Collecting ─► Storing ─► Evaluating ─► Dispatching ─► Idle
//!                  │                          │
//!                  └──── StorageError ────────┴─► cycle aborted
//! ```
//!
//! Collector failures never abort a cycle; the affected fields stay absent.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertDispatcher;
use crate::channels::{Channel, ChannelDelivery};
use crate::collectors::{CollectionError, Collector, PartialSnapshot};
use crate::config::ResolvedConfig;
use crate::storage::{MetricsStore, StorageError};
use crate::{Alert, AlertId, MetricSnapshot};

use super::thresholds::{Violation, evaluate};

/// Reports are buffered for slow subscribers up to this many cycles.
const REPORT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    #[default]
    Idle,
    Collecting,
    Storing,
    Evaluating,
    Dispatching,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Collecting => "collecting",
            CyclePhase::Storing => "storing",
            CyclePhase::Evaluating => "evaluating",
            CyclePhase::Dispatching => "dispatching",
        };
        write!(f, "{name}")
    }
}

/// Everything that happened during one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub snapshot: MetricSnapshot,
    pub violations: Vec<Violation>,
    pub raised: Vec<Alert>,
    pub resolved: Vec<Alert>,
    pub repeated: Vec<AlertId>,
    pub collection_errors: Vec<CollectionError>,
    pub deliveries: Vec<ChannelDelivery>,
}

/// A cycle that did not complete. Only storage failures abort a cycle.
#[derive(Debug)]
pub enum CycleError {
    Storage {
        phase: CyclePhase,
        source: StorageError,
    },
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Storage { phase, source } => {
                write!(f, "cycle aborted while {}: {}", phase, source)
            }
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Storage { source, .. } => Some(source),
        }
    }
}

pub struct MonitoringCycle {
    config: Arc<ResolvedConfig>,
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<dyn MetricsStore>,
    dispatcher: AlertDispatcher,
    phase: watch::Sender<CyclePhase>,
    report_tx: broadcast::Sender<CycleReport>,
    /// Timestamp given to the most recent snapshot
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl MonitoringCycle {
    pub fn new(
        config: Arc<ResolvedConfig>,
        collectors: Vec<Arc<dyn Collector>>,
        store: Arc<dyn MetricsStore>,
        channels: Vec<Arc<dyn Channel>>,
    ) -> Self {
        let dispatcher = AlertDispatcher::new(
            store.clone(),
            channels,
            config.host.clone(),
            config.notify_recovery,
            config.dispatch_timeout,
        )
        .with_monitored_services(config.critical_services.clone());
        let (phase, _) = watch::channel(CyclePhase::Idle);
        let (report_tx, _) = broadcast::channel(REPORT_CAPACITY);

        Self {
            config,
            collectors,
            store,
            dispatcher,
            phase,
            report_tx,
            last_stamp: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions as they happen.
    pub fn watch_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Receive a copy of every completed cycle's report.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.report_tx.subscribe()
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run a cycle stamped with `now` instead of the wall clock.
    ///
    /// A `now` that is not later than the previous snapshot is moved to 1 ms
    /// after it.
    #[instrument(skip(self), fields(host = %self.config.host))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let result = self.execute(now.trunc_subsecs(3)).await;
        self.enter(CyclePhase::Idle).await;

        match &result {
            Ok(report) => {
                info!(
                    "cycle complete: {} violations, {} raised, {} resolved, {} collector errors",
                    report.violations.len(),
                    report.raised.len(),
                    report.resolved.len(),
                    report.collection_errors.len()
                );
                if self.report_tx.send(report.clone()).is_err() {
                    trace!("no report subscribers");
                }
            }
            Err(e) => error!("{e}"),
        }
        result
    }

    /// Publish `phase` and let watchers see it before moving on.
    async fn enter(&self, phase: CyclePhase) {
        self.phase.send_replace(phase);
        tokio::task::yield_now().await;
    }

    /// Keep snapshot timestamps strictly increasing, even when two cycles
    /// land in the same millisecond or the clock steps back.
    async fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().await;
        let stamp = match *last {
            Some(prev) if now <= prev => {
                let bumped = prev + TimeDelta::milliseconds(1);
                debug!("clock at {} not past last snapshot {}, using {}", now, prev, bumped);
                bumped
            }
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.enter(CyclePhase::Collecting).await;
        let (partial, collection_errors) = self.collect().await;
        let now = self.stamp(now).await;
        let snapshot = partial.into_snapshot(now);

        self.enter(CyclePhase::Storing).await;
        self.store
            .append_snapshot(&snapshot)
            .await
            .map_err(|source| CycleError::Storage {
                phase: CyclePhase::Storing,
                source,
            })?;

        self.enter(CyclePhase::Evaluating).await;
        let violations = evaluate(&snapshot, &self.config.thresholds, &self.config.host);
        debug!("{} violations", violations.len());

        self.enter(CyclePhase::Dispatching).await;
        let outcome = self
            .dispatcher
            .process(&snapshot, &violations, now)
            .await
            .map_err(|source| CycleError::Storage {
                phase: CyclePhase::Dispatching,
                source,
            })?;

        Ok(CycleReport {
            snapshot,
            violations: violations.into_iter().collect(),
            raised: outcome.raised,
            resolved: outcome.resolved,
            repeated: outcome.repeated,
            collection_errors,
            deliveries: outcome.deliveries,
        })
    }

    /// Run every collector concurrently, each bounded by the collector
    /// timeout, and merge what came back.
    async fn collect(&self) -> (PartialSnapshot, Vec<CollectionError>) {
        let timeout = self.config.collector_timeout;
        let results = join_all(self.collectors.iter().map(|collector| async move {
            match tokio::time::timeout(timeout, collector.collect()).await {
                Ok(result) => result,
                Err(_) => Err(CollectionError::Timeout {
                    collector: collector.name().to_string(),
                    timeout,
                }),
            }
        }))
        .await;

        let mut merged = PartialSnapshot::default();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(partial) => merged.merge(partial),
                Err(e) => {
                    warn!("{e}");
                    errors.push(e);
                }
            }
        }
        (merged, errors)
    }
}
