use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{Channel, DispatchError, Notification};

/// Generic JSON webhook
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

pub fn build_payload(notification: &Notification) -> Value {
    let alert = &notification.alert;
    json!({
        "message": notification.text(),
        "title": notification.title(),
        "status": notification.kind,
        "host": notification.host,
        "alert_id": alert.id,
        "condition": alert.kind,
        "subject": alert.subject,
        "severity": notification.severity(),
        "first_observed": alert.first_observed.to_rfc3339(),
        "last_observed": alert.last_observed.to_rfc3339(),
        "resolved_at": alert.resolved_at.map(|at| at.to_rfc3339()),
        "timestamp": notification.at().to_rfc3339()
    })
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError> {
        let payload = build_payload(notification);
        let response = self.client.post(&self.url).json(&payload).send().await?;

        if response.status().is_success() {
            info!("Successfully sent webhook alert");
            Ok(true)
        } else {
            error!("Webhook alert failed with status: {}", response.status());
            Ok(false)
        }
    }
}
