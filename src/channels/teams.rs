use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{Channel, DispatchError, Notification};
use crate::Severity;

/// Microsoft Teams incoming webhook, using the legacy `MessageCard` format
#[derive(Debug, Clone)]
pub struct TeamsChannel {
    client: Client,
    webhook: String,
}

impl TeamsChannel {
    pub fn new(client: Client, webhook: String) -> Self {
        Self { client, webhook }
    }
}

fn theme_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "3498db",
        Severity::Warning => "f39c12",
        Severity::Critical => "e74c3c",
    }
}

pub fn build_card(notification: &Notification) -> Value {
    let title = notification.title();
    let timestamp = notification.at().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "summary": title,
        "themeColor": theme_color(notification.severity()),
        "title": title,
        "text": notification.text(),
        "sections": [{
            "facts": [
                { "name": "Host", "value": notification.host },
                { "name": "Subject", "value": notification.alert.subject },
                { "name": "Severity", "value": notification.severity().to_string() },
                { "name": "Timestamp", "value": timestamp }
            ]
        }]
    })
}

#[async_trait]
impl Channel for TeamsChannel {
    fn name(&self) -> &str {
        "teams"
    }

    #[instrument(skip_all, fields(alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError> {
        let card = build_card(notification);
        let response = self.client.post(&self.webhook).json(&card).send().await?;

        if response.status().is_success() {
            info!("Successfully sent Teams message");
            Ok(true)
        } else {
            error!("Teams message failed with status: {}", response.status());
            Ok(false)
        }
    }
}
