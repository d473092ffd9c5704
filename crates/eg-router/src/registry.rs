//! Topic Registry - maps the listener a request arrived on to its topic

use std::collections::HashMap;
use std::sync::Arc;

use eg_common::{SimulatorError, TopicSettings};
use eg_config::SimulatorConfig;
use tracing::info;

use crate::Result;

/// Read-only topic lookup, built once at startup and shared by all listeners
#[derive(Debug, Clone)]
pub struct TopicRegistry {
    /// Topics in configuration order
    topics: Vec<Arc<TopicSettings>>,
    by_port: HashMap<u16, usize>,
}

impl TopicRegistry {
    pub fn new(topics: Vec<TopicSettings>) -> Result<Self> {
        let mut by_port = HashMap::with_capacity(topics.len());

        for (index, topic) in topics.iter().enumerate() {
            if let Some(existing) = by_port.insert(topic.port, index) {
                return Err(SimulatorError::config(format!(
                    "topics '{}' and '{}' are both bound to port {}",
                    topics[existing].name, topic.name, topic.port
                )));
            }
        }

        Ok(Self {
            topics: topics.into_iter().map(Arc::new).collect(),
            by_port,
        })
    }

    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        let registry = Self::new(config.topics.clone())?;
        info!(topics = registry.len(), "Topic registry built");
        Ok(registry)
    }

    /// Settings of the topic bound to `port`
    pub fn resolve(&self, port: u16) -> Result<Arc<TopicSettings>> {
        self.by_port
            .get(&port)
            .map(|&index| self.topics[index].clone())
            .ok_or(SimulatorError::TopicNotFound { port })
    }

    pub fn topics(&self) -> impl Iterator<Item = &Arc<TopicSettings>> {
        self.topics.iter()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
