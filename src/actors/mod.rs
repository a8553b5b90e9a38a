//! Actor that drives the monitoring engine
//!
//! ## Architecture Overview
//!
//! ```text
//!   SchedulerHandle ──commands (mpsc)──► SchedulerActor
//!                                           │ spawns, one at a time
//!                                           ▼
//!                                    MonitoringCycle task
//!                                           │
//!                      reports (broadcast) ◄┘──► MetricsStore
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the actor has an mpsc command channel for control messages
//! 2. **Events**: cycle reports are published to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for replies

pub mod messages;
pub mod scheduler;

pub use messages::{SchedulerCommand, SchedulerStats};
pub use scheduler::{SchedulerActor, SchedulerHandle, SchedulerSettings};
