use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use super::{Channel, DispatchError, Notification, NotificationKind};
use crate::Severity;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

fn field(name: &str, value: impl ToString, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.to_string(),
        inline,
    }
}

pub fn build_embed(notification: &Notification) -> Embed {
    let alert = &notification.alert;
    let (emoji, color) = match (notification.kind, notification.severity()) {
        (NotificationKind::Recovered, _) => ("✅", GREEN),
        (_, Severity::Critical) => ("🔴", RED),
        (_, Severity::Warning) => ("⚠️", ORANGE),
        (_, Severity::Info) => ("ℹ️", LIGHT_BLUE),
    };

    let mut fields = vec![
        field("Condition", alert.kind.label(), true),
        field("Subject", &alert.subject, true),
        field("Severity", notification.severity(), true),
        field(
            "First observed",
            alert.first_observed.format("%Y-%m-%d %H:%M:%S UTC"),
            false,
        ),
    ];
    if let Some(resolved_at) = alert.resolved_at {
        fields.push(field(
            "Resolved",
            resolved_at.format("%Y-%m-%d %H:%M:%S UTC"),
            false,
        ));
    }

    Embed {
        title: Some(format!("{emoji} {}", notification.title())),
        description: Some(notification.text()),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: format!("Host: {} | {}", notification.host, alert.id),
        }),
        timestamp: Some(notification.at().to_rfc3339()),
    }
}

/// Discord incoming webhook
#[derive(Debug, Clone)]
pub struct DiscordChannel {
    client: Client,
    url: String,
    user_id: Option<String>,
}

impl DiscordChannel {
    pub fn new(client: Client, url: String, user_id: Option<String>) -> Self {
        Self {
            client,
            url,
            user_id,
        }
    }

    pub fn build_message(&self, notification: &Notification) -> Message {
        let mut builder = MessageBuilder::new().add_embed(build_embed(notification));
        // only ping on new problems
        if let Some(user_id) = &self.user_id
            && notification.kind == NotificationKind::Raised
        {
            builder = builder.content(format!(
                "{} ({}) <@{user_id}>",
                notification.alert.kind.label(),
                notification.alert.subject
            ));
        }
        builder.build()
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    #[instrument(skip_all, fields(alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> Result<bool, DispatchError> {
        let message = self.build_message(notification);
        let response = self.client.post(&self.url).json(&message).send().await?;

        if response.status().is_success() {
            info!("Successfully sent Discord message");
            return Ok(true);
        }

        error!("Discord message failed with status: {}", response.status());
        if let Ok(error_text) = response.text().await {
            error!("Discord API error response: {}", error_text);
        }
        Ok(false)
    }
}
