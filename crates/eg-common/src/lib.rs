use serde::{Deserialize, Serialize};

// ============================================================================
// Event Types
// ============================================================================

/// A single event as published to (and forwarded by) a topic endpoint.
///
/// Events are parsed once per request and then only read: the dispatcher
/// shares them between delivery tasks and serializes them for forwarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub subject: String,
    pub event_type: String,
    /// Kept exactly as the publisher sent it
    pub event_time: String,
    pub data: serde_json::Value,
    pub data_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
}

impl Event {
    /// Parse a request body into an ordered batch of events.
    ///
    /// The body must be a JSON array of event objects. An empty array is a
    /// valid, empty batch.
    pub fn parse_batch(body: &[u8]) -> Result<Vec<Event>> {
        serde_json::from_slice(body).map_err(|e| SimulatorError::MalformedPayload(e.to_string()))
    }

    /// Body sent to a subscriber: a JSON array holding only this event.
    pub fn to_delivery_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&[self])?)
    }

    /// Indented JSON, used for trace logging and fallback files.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Topic Configuration Types
// ============================================================================

/// A webhook that receives a copy of every event published to its topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    pub name: String,
    pub endpoint: String,
}

/// Settings for one topic, bound to exactly one listener port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSettings {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub subscribers: Vec<SubscriptionSettings>,
    /// Log every received event in full
    #[serde(default, alias = "show_full_event_trace")]
    pub show_full_event_trace: bool,
    /// Only consulted when the topic has no subscribers
    #[serde(default, alias = "save_events_to_temp_folder")]
    pub save_events_to_temp_folder: bool,
}

impl TopicSettings {
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No topic is bound to port {port}")]
    TopicNotFound { port: u16 },

    #[error(
        "Failed to deliver event {event_id} to subscriber '{subscriber}': {reason}{}",
        .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
    )]
    DeliveryFailed {
        event_id: String,
        subscriber: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Failed to persist event {event_id} to {path}: {reason}")]
    PersistenceFailed {
        event_id: String,
        path: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimulatorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SimulatorError::MalformedPayload(_) => "malformed_payload",
            SimulatorError::TopicNotFound { .. } => "topic_not_found",
            SimulatorError::DeliveryFailed { .. } => "delivery_failed",
            SimulatorError::PersistenceFailed { .. } => "persistence_failed",
            SimulatorError::Config(_) => "config",
            SimulatorError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
