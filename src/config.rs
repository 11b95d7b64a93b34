//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Names of the notifiers to broadcast through
    #[serde(default)]
    pub notify: Vec<String>,

    /// Approval round settings
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Queue transport settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Generation service
    #[serde(default)]
    pub generation: ServiceConfig,

    /// Execution service
    #[serde(default)]
    pub execution: ServiceConfig,

    /// Schema context source
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Notifier definitions
    #[serde(default)]
    pub notifications: HashMap<String, NotificationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut notifications = HashMap::new();
        notifications.insert("log".to_string(), NotificationConfig::Log);

        Self {
            notify: vec!["log".to_string()],
            approval: ApprovalConfig::default(),
            queue: QueueConfig::default(),
            generation: ServiceConfig::default(),
            execution: ServiceConfig::default(),
            schema: SchemaConfig::default(),
            notifications,
        }
    }
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .querygate/config.toml in current directory
            let local = PathBuf::from(".querygate/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.querygate/config.toml
            dirs::home_dir().map(|h| h.join(".querygate/config.toml"))
        });

        let config = match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                Self::parse(&content)?
            }
            Some(p) if path.is_some() => {
                return Err(Error::Config(format!("Config file not found: {:?}", p)));
            }
            _ => Config::default(),
        };

        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.approval.timeout.is_zero() {
            return Err(Error::Config("approval.timeout must be positive".to_string()));
        }
        if self.approval.poll_interval.is_zero() {
            return Err(Error::Config(
                "approval.poll_interval must be positive".to_string(),
            ));
        }
        if self.queue.request_queue == self.queue.response_queue {
            return Err(Error::Config(
                "request and response queues must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for each approval round and the refinement loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// How long one round waits for a decision
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// How often the response queue is revisited
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Refinements allowed per run
    #[serde(default = "default_max_refinements")]
    pub max_refinements: u32,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_max_refinements() -> u32 {
    3
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            max_refinements: default_max_refinements(),
        }
    }
}

/// Which queue transport to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// In-process only
    Memory,
    /// Files in a shared directory
    Directory,
}

impl Default for QueueKind {
    fn default() -> Self {
        QueueKind::Directory
    }
}

/// Queue transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub kind: QueueKind,

    /// Base directory for directory queues (`~` is expanded)
    #[serde(default = "default_queue_dir")]
    pub directory: String,

    #[serde(default = "default_request_queue")]
    pub request_queue: String,

    #[serde(default = "default_response_queue")]
    pub response_queue: String,
}

fn default_queue_dir() -> String {
    ".querygate/queues".to_string()
}

fn default_request_queue() -> String {
    "approval-requests".to_string()
}

fn default_response_queue() -> String {
    "approval-responses".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::default(),
            directory: default_queue_dir(),
            request_queue: default_request_queue(),
            response_queue: default_response_queue(),
        }
    }
}

impl QueueConfig {
    /// Expanded base directory
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.directory).into_owned())
    }
}

/// Remote service (generation or execution) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token, may be a `${ENV_VAR}` reference
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout
    #[serde(default, with = "humantime_serde_opt")]
    pub timeout: Option<Duration>,
}

impl ServiceConfig {
    /// API key with environment references resolved
    pub fn api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(resolve_env)
    }
}

/// Schema context configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// File holding the schema context (`~` is expanded)
    #[serde(default)]
    pub path: Option<String>,
}

impl SchemaConfig {
    pub fn path(&self) -> Option<PathBuf> {
        self.path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationConfig {
    /// Slack webhook notification
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    /// Just log
    Log,
}

/// Expand `$VAR` / `${VAR}` references, leaving the value untouched if a
/// variable is missing
pub fn resolve_env(value: &str) -> String {
    shellexpand::env(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Initialize .querygate directory with a default config
pub fn init(force: bool) -> Result<PathBuf> {
    let dir = PathBuf::from(".querygate");
    std::fs::create_dir_all(&dir)?;

    let config_path = dir.join("config.toml");
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "{:?} already exists. Use --force to overwrite.",
            config_path
        )));
    }

    let content = toml::to_string_pretty(&Config::default())
        .map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(&config_path, content)?;

    Ok(config_path)
}

// Custom serde modules for Duration using humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod humantime_serde_opt {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                let s = humantime::format_duration(*d).to_string();
                serializer.serialize_some(&s)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
