//! Notification channels
//!
//! A channel delivers one [`Notification`] to an external sink. `send`
//! returns `Ok(true)` when the sink accepted it, `Ok(false)` when the sink
//! answered but refused, and `Err` when the request could not be made.

pub mod discord;
pub mod slack;
pub mod teams;
pub mod webhook;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::ChannelsConfig;
use crate::{Alert, AlertId, Severity};

pub use discord::DiscordChannel;
pub use slack::SlackChannel;
pub use teams::TeamsChannel;
pub use webhook::WebhookChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Raised,
    Recovered,
}

/// What a channel is asked to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: Alert,
    pub host: String,
}

impl Notification {
    pub fn raised(alert: Alert, host: &str) -> Self {
        Self {
            kind: NotificationKind::Raised,
            alert,
            host: host.to_string(),
        }
    }

    pub fn recovered(alert: Alert, host: &str) -> Self {
        Self {
            kind: NotificationKind::Recovered,
            alert,
            host: host.to_string(),
        }
    }

    /// Recoveries are informational regardless of the alert's severity.
    pub fn severity(&self) -> Severity {
        match self.kind {
            NotificationKind::Raised => self.alert.severity,
            NotificationKind::Recovered => Severity::Info,
        }
    }

    pub fn title(&self) -> String {
        match self.kind {
            NotificationKind::Raised => format!("{} on {}", self.alert.kind.label(), self.host),
            NotificationKind::Recovered => {
                format!("{} recovered on {}", self.alert.kind.label(), self.host)
            }
        }
    }

    pub fn text(&self) -> String {
        match self.kind {
            NotificationKind::Raised => self.alert.message.clone(),
            NotificationKind::Recovered => format!(
                "{} is back to normal (was: {})",
                self.alert.subject, self.alert.message
            ),
        }
    }

    /// When the event this notification reports happened.
    pub fn at(&self) -> DateTime<Utc> {
        match self.kind {
            NotificationKind::Raised => self.alert.first_observed,
            NotificationKind::Recovered => {
                self.alert.resolved_at.unwrap_or(self.alert.last_observed)
            }
        }
    }
}

#[derive(Debug)]
pub enum DispatchError {
    /// The request could not be sent or its response not read
    Transport(reqwest::Error),
    /// The channel did not finish within the dispatch timeout
    Timeout(Duration),
    /// The endpoint answered but did not accept the notification
    Refused,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Transport(err) => write!(f, "transport error: {}", err),
            DispatchError::Timeout(timeout) => write!(f, "timed out after {:?}", timeout),
            DispatchError::Refused => write!(f, "endpoint refused the notification"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Transport(err)
    }
}

/// Outcome of delivering one notification to one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub alert_id: AlertId,
    pub kind: NotificationKind,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// External notification sink
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short identifier used in logs and delivery reports
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError>;
}

/// Build every enabled channel from the configuration.
pub fn build_channels(config: &ChannelsConfig) -> Vec<Arc<dyn Channel>> {
    let client = Client::new();
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

    if let Some(discord) = config.discord.as_ref().filter(|c| c.enabled) {
        channels.push(Arc::new(DiscordChannel::new(
            client.clone(),
            discord.url.clone(),
            discord.user_id.clone(),
        )));
    }
    if let Some(webhook) = config.webhook.as_ref().filter(|c| c.enabled) {
        channels.push(Arc::new(WebhookChannel::new(client.clone(), webhook.url.clone())));
    }
    if let Some(slack) = config.slack.as_ref().filter(|c| c.enabled) {
        channels.push(Arc::new(SlackChannel::new(
            client.clone(),
            slack.token.clone(),
            slack.channel.clone(),
        )));
    }
    if let Some(teams) = config.teams.as_ref().filter(|c| c.enabled) {
        channels.push(Arc::new(TeamsChannel::new(client, teams.webhook.clone())));
    }

    debug!(
        "configured channels: {:?}",
        channels.iter().map(|c| c.name().to_string()).collect::<Vec<_>>()
    );
    channels
}
