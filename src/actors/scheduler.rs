//! SchedulerActor - drives monitoring cycles on a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┐
//! RunNow ─────┼─► idle? ─► spawn cycle task ─► done channel ─► stats, reply
//!             │     └─ busy: skip and log
//! Shutdown ───┴─► wait for in-flight cycle (bounded) ─► close store ─► ack
//! ```
//!
//! Cycles run in their own task so the actor keeps answering commands while
//! one is in flight, but at most one cycle exists at any time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ResolvedConfig;
use crate::monitors::{CycleError, CycleReport, MonitoringCycle};

use super::messages::{SchedulerCommand, SchedulerStats};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub shutdown_grace: Duration,
    /// Snapshots older than this are deleted once at startup and then daily
    pub retention: Option<chrono::Duration>,
}

impl SchedulerSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            interval: config.interval,
            shutdown_grace: config.shutdown_grace,
            retention: config
                .storage
                .retention_days()
                .map(|days| chrono::Duration::days(i64::from(days))),
        }
    }
}

type CycleResult = Result<CycleReport, CycleError>;

struct InFlight {
    task: JoinHandle<()>,
    respond_to: Option<oneshot::Sender<Result<CycleReport>>>,
}

pub struct SchedulerActor {
    cycle: Arc<MonitoringCycle>,
    settings: SchedulerSettings,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    done_tx: mpsc::Sender<CycleResult>,
    done_rx: mpsc::Receiver<CycleResult>,
    in_flight: Option<InFlight>,
    stats: SchedulerStats,
}

async fn next_cleanup(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl SchedulerActor {
    pub fn new(
        cycle: Arc<MonitoringCycle>,
        settings: SchedulerSettings,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            cycle,
            settings,
            command_rx,
            done_tx,
            done_rx,
            in_flight: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Run the actor's main loop until shutdown or until every handle is
    /// dropped.
    #[instrument(skip(self), fields(interval = ?self.settings.interval))]
    pub async fn run(mut self) {
        info!("starting scheduler");

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cleanup = self.settings.retention.map(|_| {
            let mut ticker = interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.in_flight.is_some() {
                        self.stats.ticks_skipped += 1;
                        warn!("previous cycle still running, skipping tick");
                    } else {
                        self.start_cycle(None);
                    }
                }

                _ = next_cleanup(&mut cleanup) => {
                    self.cleanup().await;
                }

                Some(result) = self.done_rx.recv() => {
                    self.finish_cycle(result);
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };
                    match cmd {
                        SchedulerCommand::RunNow { respond_to } => {
                            debug!("received RunNow command");
                            if self.in_flight.is_some() {
                                warn!("RunNow rejected, a cycle is already running");
                                let _ = respond_to.send(Err(anyhow!("a cycle is already running")));
                            } else {
                                self.start_cycle(Some(respond_to));
                            }
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.current_stats());
                        }

                        SchedulerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            self.shutdown().await;
                            let _ = respond_to.send(());
                            return;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn current_stats(&self) -> SchedulerStats {
        SchedulerStats {
            busy: self.in_flight.is_some(),
            phase: self.cycle.phase(),
            ..self.stats.clone()
        }
    }

    fn start_cycle(&mut self, respond_to: Option<oneshot::Sender<Result<CycleReport>>>) {
        let cycle = self.cycle.clone();
        let done_tx = self.done_tx.clone();
        let task = tokio::spawn(async move {
            let result = cycle.run_cycle().await;
            let _ = done_tx.send(result).await;
        });
        self.in_flight = Some(InFlight { task, respond_to });
    }

    fn finish_cycle(&mut self, result: CycleResult) {
        let respond_to = self.in_flight.take().and_then(|f| f.respond_to);
        self.record(result, respond_to);
    }

    fn record(
        &mut self,
        result: CycleResult,
        respond_to: Option<oneshot::Sender<Result<CycleReport>>>,
    ) {
        match &result {
            Ok(report) => {
                self.stats.cycles_completed += 1;
                self.stats.last_cycle_at = Some(report.snapshot.timestamp);
            }
            // already logged by the cycle, retried on the next tick
            Err(_) => self.stats.cycles_failed += 1,
        }

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(result.map_err(anyhow::Error::from));
        }
    }

    #[instrument(skip(self))]
    async fn cleanup(&mut self) {
        let Some(retention) = self.settings.retention else {
            return;
        };
        let before = Utc::now() - retention;
        match self.cycle.store().cleanup_old_snapshots(before).await {
            Ok(deleted) => self.stats.snapshots_cleaned += deleted as u64,
            Err(e) => error!("failed to clean up snapshots before {}: {}", before, e),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(InFlight { task, respond_to }) = self.in_flight.take() {
            info!(
                "waiting up to {:?} for the running cycle to finish",
                self.settings.shutdown_grace
            );
            match tokio::time::timeout(self.settings.shutdown_grace, self.done_rx.recv()).await {
                Ok(Some(result)) => self.record(result, respond_to),
                Ok(None) => {}
                Err(_) => {
                    warn!("cycle did not finish within the grace period, aborting it");
                    task.abort();
                    self.stats.cycles_aborted += 1;
                    if let Some(respond_to) = respond_to {
                        let _ = respond_to.send(Err(anyhow!("cycle aborted by shutdown")));
                    }
                }
            }
        }

        if let Err(e) = self.cycle.store().close().await {
            error!("failed to close store: {}", e);
        }
        info!("scheduler stopped");
    }
}

/// Handle for controlling a SchedulerActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    cycle: Arc<MonitoringCycle>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    ///
    /// The first cycle starts immediately; later ones follow the interval.
    pub fn spawn(cycle: Arc<MonitoringCycle>, settings: SchedulerSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(cycle.clone(), settings, cmd_rx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            cycle,
        }
    }

    /// Run a cycle now and wait for its report
    ///
    /// Fails if a cycle is already running or the cycle itself failed.
    pub async fn run_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Receive the report of every completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.cycle.subscribe()
    }

    /// Gracefully shut down and wait until the store is closed
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("scheduler stopped without acknowledging")?;
        Ok(())
    }
}
