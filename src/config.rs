use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (snapshots older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => {
                Some(*retention_days).filter(|days| *days > 0)
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./metrics.db")
}

fn default_retention_days() -> u32 {
    30
}

/// Configuration as it is written in the JSON file.
///
/// Every field is optional. [`Config::resolve`] fills in defaults and
/// validates the result.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub host: Option<String>,

    /// Seconds between two monitoring cycles
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_critical_services")]
    pub critical_services: Vec<String>,

    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    #[serde(default = "default_disk_threshold")]
    pub disk_threshold: f64,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default = "default_true")]
    pub notify_recovery: bool,

    /// Seconds
    #[serde(default = "default_collector_timeout")]
    pub collector_timeout: u64,

    /// Seconds
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: u64,

    /// Seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,

    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ChannelsConfig {
    pub discord: Option<Discord>,
    pub webhook: Option<Webhook>,
    pub slack: Option<Slack>,
    pub teams: Option<Teams>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Discord {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Webhook {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Slack {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bot token (`xoxb-...`)
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_slack_channel")]
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Teams {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhook: String,
}

fn default_interval() -> u64 {
    300
}

fn default_critical_services() -> Vec<String> {
    ["sshd", "cron", "systemd-journald", "systemd-resolved"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cpu_threshold() -> f64 {
    90.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_disk_threshold() -> f64 {
    90.0
}

fn default_true() -> bool {
    true
}

fn default_collector_timeout() -> u64 {
    20
}

fn default_dispatch_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_slack_channel() -> String {
    "#alerts".to_string()
}

/// Limits a snapshot is evaluated against, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu_threshold(),
            memory: default_memory_threshold(),
            disk: default_disk_threshold(),
        }
    }
}

/// Validated, immutable configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub host: String,
    pub interval: Duration,
    pub critical_services: BTreeSet<String>,
    pub thresholds: Thresholds,
    pub channels: ChannelsConfig,
    pub notify_recovery: bool,
    pub collector_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub shutdown_grace: Duration,
    pub storage: StorageConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse(err) => write!(f, "invalid configuration file: {}", err),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(field, format!("{value} is not within [0, 100]")))
    }
}

fn check_secret(field: &'static str, enabled: bool, value: &str) -> Result<(), ConfigError> {
    if enabled && value.trim().is_empty() {
        return Err(invalid(field, "channel is enabled but has no endpoint"));
    }
    Ok(())
}

fn check_seconds(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(value))
}

impl Config {
    /// Replace channel secrets with values from the environment.
    ///
    /// Only channels that are present in the file are touched; an env var
    /// never enables a channel on its own.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let channels = &mut self.channels;
        if let Some(discord) = channels.discord.as_mut()
            && let Some(url) = lookup(util::DISCORD_URL_ENV)
        {
            discord.url = url;
        }
        if let Some(webhook) = channels.webhook.as_mut()
            && let Some(url) = lookup(util::WEBHOOK_URL_ENV)
        {
            webhook.url = url;
        }
        if let Some(slack) = channels.slack.as_mut()
            && let Some(token) = lookup(util::SLACK_TOKEN_ENV)
        {
            slack.token = token;
        }
        if let Some(teams) = channels.teams.as_mut()
            && let Some(webhook) = lookup(util::TEAMS_WEBHOOK_ENV)
        {
            teams.webhook = webhook;
        }
    }

    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let interval = check_seconds("interval", self.interval)?;
        let collector_timeout = check_seconds("collector_timeout", self.collector_timeout)?;
        let dispatch_timeout = check_seconds("dispatch_timeout", self.dispatch_timeout)?;
        let shutdown_grace = check_seconds("shutdown_grace", self.shutdown_grace)?;

        let thresholds = Thresholds {
            cpu: check_percentage("cpu_threshold", self.cpu_threshold)?,
            memory: check_percentage("memory_threshold", self.memory_threshold)?,
            disk: check_percentage("disk_threshold", self.disk_threshold)?,
        };

        let channels = self.channels;
        if let Some(discord) = &channels.discord {
            check_secret("channels.discord.url", discord.enabled, &discord.url)?;
        }
        if let Some(webhook) = &channels.webhook {
            check_secret("channels.webhook.url", webhook.enabled, &webhook.url)?;
        }
        if let Some(slack) = &channels.slack {
            check_secret("channels.slack.token", slack.enabled, &slack.token)?;
        }
        if let Some(teams) = &channels.teams {
            check_secret("channels.teams.webhook", teams.enabled, &teams.webhook)?;
        }

        let mut critical_services = BTreeSet::new();
        for name in self.critical_services {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(invalid("critical_services", "service names must not be empty"));
            }
            critical_services.insert(name);
        }

        let host = match self.host.map(|h| h.trim().to_string()) {
            Some(host) if !host.is_empty() => host,
            Some(_) => return Err(invalid("host", "must not be empty")),
            None => util::local_host_name(),
        };

        Ok(ResolvedConfig {
            host,
            interval,
            critical_services,
            thresholds,
            channels,
            notify_recovery: self.notify_recovery,
            collector_timeout,
            dispatch_timeout,
            shutdown_grace,
            storage: self.storage.unwrap_or_default(),
        })
    }
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

/// Read, override from the environment and validate a JSON config file.
pub fn read_config_file(path: impl AsRef<Path>) -> Result<ResolvedConfig, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&file_content)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .resolve()
        .inspect(|config| trace!("loaded config: {config:?}"))
}
