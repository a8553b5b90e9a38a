//! Message types for actor communication
//!
//! 1. **Commands**: Request/response messages sent to the scheduler via mpsc
//! 2. **Events**: Cycle reports broadcast to any number of subscribers
//!    (see [`crate::monitors::CycleReport`])

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::monitors::{CyclePhase, CycleReport};

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a cycle now instead of waiting for the next tick
    ///
    /// Rejected with an error if a cycle is already running.
    RunNow {
        respond_to: oneshot::Sender<anyhow::Result<CycleReport>>,
    },

    /// Get the scheduler's counters
    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },

    /// Gracefully shut down
    ///
    /// The actor waits for an in-flight cycle (bounded by the shutdown
    /// grace period), closes the store and then acknowledges.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Counters kept by the scheduler since it started
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    /// Ticks that fired while a cycle was still running
    pub ticks_skipped: u64,
    /// Cycles cut off at shutdown after the grace period
    pub cycles_aborted: u64,
    pub snapshots_cleaned: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Whether a cycle is running right now
    pub busy: bool,
    /// Phase of the running cycle, `Idle` between cycles
    pub phase: CyclePhase,
}
