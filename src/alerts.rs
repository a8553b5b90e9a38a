use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::channels::{Channel, ChannelDelivery, DispatchError, Notification};
use crate::monitors::thresholds::{Violation, observes};
use crate::storage::{MetricsStore, StorageResult};
use crate::{Alert, AlertId, ConditionKind, MetricSnapshot};

/// Alert changes made while processing one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub raised: Vec<Alert>,
    pub repeated: Vec<AlertId>,
    pub resolved: Vec<Alert>,
    pub deliveries: Vec<ChannelDelivery>,
}

/// Turns violations into deduplicated alerts and notifications.
///
/// Holds no state between cycles: the set of active alerts is read back from
/// the store every time, so a restart picks up where the last run stopped.
pub struct AlertDispatcher {
    store: Arc<dyn MetricsStore>,
    channels: Vec<Arc<dyn Channel>>,
    host: String,
    notify_recovery: bool,
    dispatch_timeout: Duration,
    /// Services the collector is asked about; `None` treats every service as
    /// monitored
    monitored_services: Option<BTreeSet<String>>,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        channels: Vec<Arc<dyn Channel>>,
        host: impl Into<String>,
        notify_recovery: bool,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channels,
            host: host.into(),
            notify_recovery,
            dispatch_timeout,
            monitored_services: None,
        }
    }

    /// Resolve `ServiceDown` alerts for services outside `services` instead
    /// of waiting for the collector to report them again.
    pub fn with_monitored_services(mut self, services: BTreeSet<String>) -> Self {
        self.monitored_services = Some(services);
        self
    }

    /// Whether `snapshot` is enough to call `alert` recovered when it was not
    /// violated.
    fn decides(&self, snapshot: &MetricSnapshot, alert: &Alert) -> bool {
        if observes(snapshot, alert) {
            return true;
        }
        // no longer monitored, so it will never be observed again
        alert.kind == ConditionKind::ServiceDown
            && self
                .monitored_services
                .as_ref()
                .is_some_and(|services| !services.contains(&alert.subject))
    }

    /// Reconcile `violations` with the active alerts and notify channels.
    ///
    /// Every alert change is persisted before any notification goes out. If
    /// persisting fails part way, notifications for the changes that were
    /// already stored are still sent and the storage error is returned.
    #[instrument(skip_all, fields(violations = violations.len()))]
    pub async fn process(
        &self,
        snapshot: &MetricSnapshot,
        violations: &BTreeSet<Violation>,
        now: DateTime<Utc>,
    ) -> StorageResult<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();
        let mut notifications = Vec::new();

        let persisted = self
            .persist(snapshot, violations, now, &mut outcome, &mut notifications)
            .await;
        outcome.deliveries = self.dispatch(&notifications).await;

        persisted.map(|()| outcome)
    }

    async fn persist(
        &self,
        snapshot: &MetricSnapshot,
        violations: &BTreeSet<Violation>,
        now: DateTime<Utc>,
        outcome: &mut DispatchOutcome,
        notifications: &mut Vec<Notification>,
    ) -> StorageResult<()> {
        let mut active: BTreeMap<AlertId, Alert> = self
            .store
            .active_alerts(DateTime::UNIX_EPOCH)
            .await?
            .into_iter()
            .map(|alert| (alert.id.clone(), alert))
            .collect();

        for violation in violations {
            let id = violation.alert_id();
            match active.remove(&id) {
                Some(mut alert) => {
                    alert.last_observed = now;
                    alert.message = violation.message.clone();
                    alert.severity = violation.kind.severity();
                    self.store.append_or_update_alert(&alert).await?;
                    debug!("{} still active since {}", id, alert.first_observed);
                    outcome.repeated.push(id);
                }
                None => {
                    let alert = Alert::raise(
                        violation.kind,
                        &violation.subject,
                        violation.message.clone(),
                        now,
                    );
                    self.store.append_or_update_alert(&alert).await?;
                    info!(
                        "raised {} ({}) for {} at {}",
                        alert.id, alert.severity, alert.subject, now
                    );
                    notifications.push(Notification::raised(alert.clone(), &self.host));
                    outcome.raised.push(alert);
                }
            }
        }

        // whatever is left in `active` was not violated this cycle
        for (id, mut alert) in active {
            if !self.decides(snapshot, &alert) {
                debug!("{} not observed in snapshot, leaving it active", id);
                continue;
            }
            alert.resolved = true;
            alert.resolved_at = Some(now);
            self.store.append_or_update_alert(&alert).await?;
            info!("resolved {} for {} at {}", id, alert.subject, now);
            if self.notify_recovery {
                notifications.push(Notification::recovered(alert.clone(), &self.host));
            }
            outcome.resolved.push(alert);
        }

        Ok(())
    }

    /// Send every notification to every channel concurrently and wait for
    /// all of them. Failures are logged and reported, never propagated.
    async fn dispatch(&self, notifications: &[Notification]) -> Vec<ChannelDelivery> {
        let attempts = notifications.iter().flat_map(|notification| {
            self.channels
                .iter()
                .map(move |channel| self.deliver(channel.as_ref(), notification))
        });
        join_all(attempts).await
    }

    async fn deliver(
        &self,
        channel: &dyn Channel,
        notification: &Notification,
    ) -> ChannelDelivery {
        let sent = tokio::time::timeout(self.dispatch_timeout, channel.send(notification)).await;
        let result = match sent {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(DispatchError::Refused),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DispatchError::Timeout(self.dispatch_timeout)),
        };

        let alert = &notification.alert;
        if let Err(e) = &result {
            warn!(
                "failed to deliver {:?} notification for {} (subject {}, at {}) via {}: {}",
                notification.kind,
                alert.kind,
                alert.subject,
                notification.at(),
                channel.name(),
                e
            );
        }

        ChannelDelivery {
            channel: channel.name().to_string(),
            alert_id: alert.id.clone(),
            kind: notification.kind,
            delivered: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}
