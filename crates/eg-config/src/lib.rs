//! Event Grid Simulator configuration
//!
//! Loads the topic list from a TOML or JSON document. The format is picked
//! from the file extension: `.json` is read as JSON, anything else as TOML.
//! Keys are camelCase; snake_case spellings are accepted as well.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use eg_common::TopicSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Directory name used under the system temp dir when no fallback directory
/// is configured
pub const DEFAULT_FALLBACK_DIR_NAME: &str = "EventGridSimulator";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for eg_common::SimulatorError {
    fn from(e: ConfigError) -> Self {
        eg_common::SimulatorError::config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    pub topics: Vec<TopicSettings>,
    /// Root for events persisted by topics without subscribers
    #[serde(default, alias = "fallback_directory", skip_serializing_if = "Option::is_none")]
    pub fallback_directory: Option<PathBuf>,
}

impl SimulatorConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        info!(
            path = %path.display(),
            topics = config.topics.len(),
            "Loaded simulator configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the router relies on: one topic per port,
    /// unique topic names, and absolute http(s) subscriber endpoints.
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(ConfigError::Invalid("at least one topic must be configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for topic in &self.topics {
            if topic.name.trim().is_empty() {
                return Err(ConfigError::Invalid("topic name must not be empty".to_string()));
            }
            if !names.insert(topic.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate topic name '{}'", topic.name)));
            }
            if topic.port == 0 {
                return Err(ConfigError::Invalid(format!("topic '{}' has no port", topic.name)));
            }
            if !ports.insert(topic.port) {
                return Err(ConfigError::Invalid(format!(
                    "port {} is bound to more than one topic",
                    topic.port
                )));
            }

            for subscriber in &topic.subscribers {
                if subscriber.name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "topic '{}' has a subscriber without a name",
                        topic.name
                    )));
                }
                if !is_http_url(&subscriber.endpoint) {
                    return Err(ConfigError::Invalid(format!(
                        "subscriber '{}' of topic '{}' has invalid endpoint '{}'",
                        subscriber.name, topic.name, subscriber.endpoint
                    )));
                }
            }

            debug!(
                topic = %topic.name,
                port = topic.port,
                subscribers = topic.subscribers.len(),
                "Topic configuration valid"
            );
        }

        Ok(())
    }

    /// Root directory for fallback persistence
    pub fn fallback_root(&self) -> PathBuf {
        self.fallback_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_FALLBACK_DIR_NAME))
    }
}

fn is_http_url(endpoint: &str) -> bool {
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"));

    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}
