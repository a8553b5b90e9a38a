pub mod cycle;
pub mod thresholds;

pub use cycle::{CycleError, CyclePhase, CycleReport, MonitoringCycle};
pub use thresholds::{Violation, evaluate, observes};
