use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{Channel, DispatchError, Notification};
use crate::Severity;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Slack bot posting through `chat.postMessage`
#[derive(Debug, Clone)]
pub struct SlackChannel {
    client: Client,
    token: String,
    channel: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackChannel {
    pub fn new(client: Client, token: String, channel: String) -> Self {
        Self {
            client,
            token,
            channel,
            api_url: POST_MESSAGE_URL.to_string(),
        }
    }

    /// Point the channel at a different `chat.postMessage` endpoint
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn build_payload(&self, notification: &Notification) -> Value {
        let emoji = match notification.severity() {
            Severity::Critical => ":red_circle:",
            Severity::Warning => ":warning:",
            Severity::Info => ":information_source:",
        };
        let title = notification.title();
        let severity = notification.severity();
        let subject = &notification.alert.subject;

        json!({
            "channel": self.channel,
            "text": format!("{emoji} {title}"),
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": format!("{emoji} {title}"),
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": notification.text() }
                },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*Severity:*\n{severity}") },
                        { "type": "mrkdwn", "text": format!("*Subject:*\n{subject}") }
                    ]
                },
                { "type": "divider" },
                {
                    "type": "context",
                    "elements": [
                        {
                            "type": "mrkdwn",
                            "text": format!(
                                "{} | {}",
                                notification.host,
                                notification.at().format("%Y-%m-%d %H:%M:%S UTC")
                            )
                        }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    #[instrument(skip_all, fields(alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError> {
        let payload = self.build_payload(notification);
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            error!("Slack message failed with status: {}", response.status());
            return Ok(false);
        }

        // Slack answers 200 for most failures and reports them in the body
        let body: SlackResponse = response.json().await?;
        if body.ok {
            info!("Successfully sent Slack message");
            Ok(true)
        } else {
            error!(
                "Slack API error: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
            Ok(false)
        }
    }
}
