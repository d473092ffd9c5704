//! HTTP delivery to subscriber webhooks
//!
//! Every delivery carries exactly one event wrapped in a JSON array, the
//! `aeg-event-type: Notification` header, and is bounded by a per-call
//! timeout. Nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use eg_common::{Event, SimulatorError, SubscriptionSettings};
use reqwest::header::CONTENT_TYPE;

use crate::Result;

pub const AEG_EVENT_TYPE_HEADER: &str = "aeg-event-type";
pub const NOTIFICATION_EVENT_TYPE: &str = "Notification";

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Result of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Subscriber answered with a 2xx status
    Succeeded,
    /// Non-success status, timeout, connection or transport error
    Failed,
}

/// Outcome of delivering one event to one subscriber
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub result: DeliveryResult,
    pub status_code: Option<u16>,
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    pub fn succeeded(status_code: u16) -> Self {
        Self {
            result: DeliveryResult::Succeeded,
            status_code: Some(status_code),
            reason: None,
        }
    }

    pub fn failed(status_code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            result: DeliveryResult::Failed,
            status_code,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == DeliveryResult::Succeeded
    }

    /// The failure as a `DeliveryFailed` error, `None` for a success
    pub fn into_error(self, event_id: &str, subscriber: &str) -> Option<SimulatorError> {
        match self.result {
            DeliveryResult::Succeeded => None,
            DeliveryResult::Failed => Some(SimulatorError::DeliveryFailed {
                event_id: event_id.to_string(),
                subscriber: subscriber.to_string(),
                status: self.status_code,
                reason: self.reason.unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }
}

/// Delivers a single event to a single subscriber.
///
/// Implementations must not panic or return early on failure: every
/// outcome is reported through [`DeliveryOutcome`].
#[async_trait]
pub trait SubscriberClient: Send + Sync {
    async fn deliver(&self, subscription: &SubscriptionSettings, event: &Event) -> DeliveryOutcome;
}

/// HTTP subscriber client configuration
#[derive(Debug, Clone)]
pub struct HttpSubscriberClientConfig {
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout, applied to every delivery
    pub request_timeout: Duration,
}

impl Default for HttpSubscriberClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Webhook client backed by one pooled `reqwest::Client`
pub struct HttpSubscriberClient {
    config: HttpSubscriberClientConfig,
    client: reqwest::Client,
}

impl HttpSubscriberClient {
    pub fn new(config: HttpSubscriberClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SimulatorError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl SubscriberClient for HttpSubscriberClient {
    async fn deliver(&self, subscription: &SubscriptionSettings, event: &Event) -> DeliveryOutcome {
        let body = match event.to_delivery_body() {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::failed(None, format!("serialization failed: {}", e)),
        };

        let response = self
            .client
            .post(&subscription.endpoint)
            .header(AEG_EVENT_TYPE_HEADER, NOTIFICATION_EVENT_TYPE)
            .header(CONTENT_TYPE, JSON_UTF8)
            .timeout(self.config.request_timeout)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryOutcome::succeeded(status.as_u16())
                } else {
                    let reason = status.canonical_reason().unwrap_or("Unknown status");
                    DeliveryOutcome::failed(Some(status.as_u16()), reason)
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::failed(
                None,
                format!("timed out after {:?}", self.config.request_timeout),
            ),
            Err(e) if e.is_connect() => {
                DeliveryOutcome::failed(None, format!("connection failed: {}", e))
            }
            Err(e) => DeliveryOutcome::failed(e.status().map(|s| s.as_u16()), e.to_string()),
        }
    }
}
