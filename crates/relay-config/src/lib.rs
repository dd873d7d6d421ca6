use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found. Run 'relayd init-config' first.")]
    NotFound,
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No home directory")]
    NoHomeDir,
    #[error("No agent section configured")]
    NoAgent,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub const DEFAULT_REQUEST_TOPIC: &str = "deployment-requests";
pub const DEFAULT_STATUS_TOPIC: &str = "deployment-status";
pub const DEFAULT_TTL_SECONDS: u64 = 60;
/// One day.
pub const MAX_TTL_SECONDS: u64 = 86_400;
pub const DEFAULT_STATUS_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;
pub const MAX_IN_FLIGHT: usize = 1024;
pub const DEFAULT_FIELD_MANAGER: &str = "relay-agent";
pub const DEFAULT_IMPERSONATE_TEMPLATE: &str = "system:serviceaccount:{team}:serviceuser-{team}";

/// Relay configuration stored in ~/.relay/config.json
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    #[serde(default = "default_request_topic")]
    pub topic: String,
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Lifetime of a signed request. Never taken from the trigger.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub cluster: String,
    #[serde(default = "default_request_topic")]
    pub topic: String,
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    #[serde(default = "default_status_queue_capacity")]
    pub status_queue_capacity: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    /// `{team}` is replaced with the team name.
    #[serde(default = "default_impersonate_template")]
    pub impersonate_template: String,
}

fn default_request_topic() -> String {
    DEFAULT_REQUEST_TOPIC.to_string()
}

fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.to_string()
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

fn default_status_queue_capacity() -> usize {
    DEFAULT_STATUS_QUEUE_CAPACITY
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn default_impersonate_template() -> String {
    DEFAULT_IMPERSONATE_TEMPLATE.to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: default_request_topic(),
            status_topic: default_status_topic(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

impl AgentConfig {
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            topic: default_request_topic(),
            status_topic: default_status_topic(),
            status_queue_capacity: DEFAULT_STATUS_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            field_manager: default_field_manager(),
            impersonate_template: default_impersonate_template(),
        }
    }
}

impl RelayConfig {
    /// Load config from default path (~/.relay/config.json)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path()?)
    }

    /// Load config from custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound
            } else {
                ConfigError::Read(e)
            }
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from(path) {
            Err(ConfigError::NotFound) => Ok(Self::default()),
            other => other,
        }
    }

    /// Save config to default path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path()?)
    }

    /// Save config to custom path
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self)?)?;
        Ok(())
    }

    /// Get default config path (~/.relay/config.json)
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".relay")
            .join("config.json"))
    }

    pub fn agent(&self) -> Result<&AgentConfig, ConfigError> {
        self.agent.as_ref().ok_or(ConfigError::NoAgent)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.topic.is_empty() || self.dispatcher.status_topic.is_empty() {
            return Err(ConfigError::Invalid("dispatcher topics must not be empty".into()));
        }
        if self.dispatcher.ttl_seconds > MAX_TTL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.ttl_seconds must be at most {MAX_TTL_SECONDS}"
            )));
        }
        if let Some(agent) = &self.agent {
            if agent.cluster.is_empty() {
                return Err(ConfigError::Invalid("agent.cluster must not be empty".into()));
            }
            if agent.max_in_flight == 0 || agent.max_in_flight > MAX_IN_FLIGHT {
                return Err(ConfigError::Invalid(format!(
                    "agent.max_in_flight must be between 1 and {MAX_IN_FLIGHT}"
                )));
            }
            if agent.status_queue_capacity == 0 {
                return Err(ConfigError::Invalid(
                    "agent.status_queue_capacity must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}
