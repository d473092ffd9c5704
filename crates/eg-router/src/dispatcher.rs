//! Dispatcher - routes one event to its topic's destinations
//!
//! With subscribers, the event is fanned out to every subscriber on its own
//! task; each delivery succeeds or fails on its own and nothing is retried.
//! Without subscribers, the event is written to the fallback store when the
//! topic asks for it, and dropped otherwise. Failures never leave this module
//! except as log lines, metrics and the returned [`DispatchOutcome`].

use std::path::PathBuf;
use std::sync::Arc;

use eg_common::{Event, SubscriptionSettings, TopicSettings};
use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryOutcome, SubscriberClient};
use crate::fallback::FallbackStore;

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to every subscriber, counting each result
    FannedOut { succeeded: usize, failed: usize },
    /// Written to the fallback store
    Persisted(PathBuf),
    /// Fallback write failed; the event is lost
    PersistenceFailed,
    /// No subscribers and fallback disabled
    Dropped,
}

pub struct Dispatcher {
    client: Arc<dyn SubscriberClient>,
    store: Arc<dyn FallbackStore>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn SubscriberClient>, store: Arc<dyn FallbackStore>) -> Self {
        Self { client, store }
    }

    /// Route `event` for `topic` and wait until every attempt has finished.
    pub async fn dispatch(&self, event: Arc<Event>, topic: Arc<TopicSettings>) -> DispatchOutcome {
        info!(topic = %topic.name, subject = %event.subject, event_id = %event.id, "New event");
        counter!("eg_events_received_total", "topic" => topic.name.clone()).increment(1);

        if topic.show_full_event_trace {
            match event.to_pretty_json() {
                Ok(json) => info!(topic = %topic.name, "Event: {}", json),
                Err(e) => warn!(event_id = %event.id, error = %e, "Could not render event trace"),
            }
        }

        if topic.has_subscribers() {
            self.fan_out(event, topic).await
        } else if topic.save_events_to_temp_folder {
            self.persist(&event, &topic).await
        } else {
            debug!(topic = %topic.name, event_id = %event.id, "No subscribers, event dropped");
            counter!("eg_events_dropped_total", "topic" => topic.name.clone()).increment(1);
            DispatchOutcome::Dropped
        }
    }

    async fn fan_out(&self, event: Arc<Event>, topic: Arc<TopicSettings>) -> DispatchOutcome {
        let mut deliveries = JoinSet::new();

        for subscription in &topic.subscribers {
            let client = self.client.clone();
            let event = event.clone();
            let topic_name = topic.name.clone();
            let subscription = subscription.clone();

            deliveries.spawn(async move {
                debug!(subscriber = %subscription.name, event_id = %event.id, "Sending to subscriber");
                let outcome = client.deliver(&subscription, &event).await;
                record_delivery(&topic_name, &subscription, &event, outcome)
            });
        }

        let mut succeeded = 0;
        let mut failed = 0;

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(
                        topic = %topic.name,
                        event_id = %event.id,
                        error = %e,
                        "Delivery task did not complete"
                    );
                    counter!(
                        "eg_deliveries_total",
                        "topic" => topic.name.clone(),
                        "outcome" => "failed"
                    )
                    .increment(1);
                    failed += 1;
                }
            }
        }

        DispatchOutcome::FannedOut { succeeded, failed }
    }

    async fn persist(&self, event: &Event, topic: &TopicSettings) -> DispatchOutcome {
        match self.store.persist(topic, event).await {
            Ok(path) => {
                info!(
                    topic = %topic.name,
                    event_id = %event.id,
                    path = %path.display(),
                    "Event saved to fallback folder"
                );
                counter!("eg_events_persisted_total", "topic" => topic.name.clone()).increment(1);
                DispatchOutcome::Persisted(path)
            }
            Err(e) => {
                error!(topic = %topic.name, event_id = %event.id, error = %e, "Failed to save event");
                counter!("eg_events_persist_failed_total", "topic" => topic.name.clone()).increment(1);
                DispatchOutcome::PersistenceFailed
            }
        }
    }
}

/// Log and count one delivery, returning whether it succeeded
fn record_delivery(
    topic: &str,
    subscription: &SubscriptionSettings,
    event: &Event,
    outcome: DeliveryOutcome,
) -> bool {
    if outcome.is_success() {
        debug!(
            event_id = %event.id,
            subscriber = %subscription.name,
            status = ?outcome.status_code,
            "Event sent to subscriber successfully"
        );
        counter!("eg_deliveries_total", "topic" => topic.to_string(), "outcome" => "succeeded")
            .increment(1);
        return true;
    }

    let status = outcome.status_code;
    if let Some(e) = outcome.into_error(&event.id, &subscription.name) {
        error!(
            event_id = %event.id,
            subscriber = %subscription.name,
            endpoint = %subscription.endpoint,
            status = ?status,
            error = %e,
            "Failed to send event to subscriber"
        );
    }
    counter!("eg_deliveries_total", "topic" => topic.to_string(), "outcome" => "failed").increment(1);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eg_common::SimulatorError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Records every delivery; responds per subscriber name
    struct MockClient {
        delivered: Mutex<Vec<(String, String)>>,
        responses: HashMap<String, MockResponse>,
    }

    #[derive(Clone, Copy)]
    enum MockResponse {
        Ok,
        Fail,
        Slow(Duration),
        Panic,
    }

    impl MockClient {
        fn new(responses: &[(&str, MockResponse)]) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                responses: responses.iter().map(|(n, r)| (n.to_string(), *r)).collect(),
            }
        }

        fn deliveries(&self) -> Vec<(String, String)> {
            self.delivered.lock().clone()
        }
    }

    #[async_trait]
    impl SubscriberClient for MockClient {
        async fn deliver(&self, subscription: &SubscriptionSettings, event: &Event) -> DeliveryOutcome {
            self.delivered
                .lock()
                .push((subscription.name.clone(), event.id.clone()));

            match self.responses.get(&subscription.name).copied().unwrap_or(MockResponse::Ok) {
                MockResponse::Ok => DeliveryOutcome::succeeded(200),
                MockResponse::Fail => DeliveryOutcome::failed(Some(500), "Internal Server Error"),
                MockResponse::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    DeliveryOutcome::succeeded(200)
                }
                MockResponse::Panic => panic!("subscriber client blew up"),
            }
        }
    }

    #[derive(Default)]
    struct MockStore {
        persisted: Mutex<Vec<Event>>,
        fail: bool,
    }

    #[async_trait]
    impl FallbackStore for MockStore {
        async fn persist(&self, topic: &TopicSettings, event: &Event) -> eg_common::Result<PathBuf> {
            if self.fail {
                return Err(SimulatorError::PersistenceFailed {
                    event_id: event.id.clone(),
                    path: "/nowhere".to_string(),
                    reason: "disk full".to_string(),
                });
            }
            self.persisted.lock().push(event.clone());
            Ok(PathBuf::from(format!("/tmp/{}-{}.json", topic.name, event.id)))
        }
    }

    fn create_test_event(id: &str) -> Arc<Event> {
        Arc::new(Event {
            id: id.to_string(),
            topic: None,
            subject: "orderCreated".to_string(),
            event_type: "Orders.OrderCreated".to_string(),
            event_time: "2024-03-01T12:00:00Z".to_string(),
            data: serde_json::json!({"orderId": 42}),
            data_version: "1.0".to_string(),
            metadata_version: None,
        })
    }

    fn create_topic(subscribers: &[&str], save: bool) -> Arc<TopicSettings> {
        Arc::new(TopicSettings {
            name: "orders".to_string(),
            port: 60101,
            subscribers: subscribers
                .iter()
                .map(|name| SubscriptionSettings {
                    name: name.to_string(),
                    endpoint: format!("http://localhost:9000/{}", name),
                })
                .collect(),
            show_full_event_trace: true,
            save_events_to_temp_folder: save,
        })
    }

    fn dispatcher(client: Arc<MockClient>, store: Arc<MockStore>) -> Dispatcher {
        Dispatcher::new(client, store)
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_one_attempt() {
        let client = Arc::new(MockClient::new(&[]));
        let store = Arc::new(MockStore::default());
        let d = dispatcher(client.clone(), store.clone());

        let outcome = d
            .dispatch(create_test_event("1"), create_topic(&["a", "b", "c"], true))
            .await;

        assert_eq!(outcome, DispatchOutcome::FannedOut { succeeded: 3, failed: 0 });
        let mut names: Vec<String> = client.deliveries().into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
        // fallback is ignored when subscribers exist
        assert!(store.persisted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_subscriber_does_not_affect_others() {
        let client = Arc::new(MockClient::new(&[("ok", MockResponse::Ok), ("broken", MockResponse::Fail)]));
        let d = dispatcher(client.clone(), Arc::new(MockStore::default()));

        let outcome = d
            .dispatch(create_test_event("1"), create_topic(&["ok", "broken"], false))
            .await;

        assert_eq!(outcome, DispatchOutcome::FannedOut { succeeded: 1, failed: 1 });
        assert_eq!(client.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_delivery_is_isolated() {
        let client = Arc::new(MockClient::new(&[("bomb", MockResponse::Panic)]));
        let d = dispatcher(client.clone(), Arc::new(MockStore::default()));

        let outcome = d
            .dispatch(create_test_event("1"), create_topic(&["bomb", "fine"], false))
            .await;

        assert_eq!(outcome, DispatchOutcome::FannedOut { succeeded: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_deliveries_run_concurrently() {
        let slow = MockResponse::Slow(Duration::from_millis(300));
        let client = Arc::new(MockClient::new(&[("a", slow), ("b", slow), ("c", slow), ("d", slow)]));
        let d = dispatcher(client, Arc::new(MockStore::default()));

        let started = std::time::Instant::now();
        let outcome = d
            .dispatch(create_test_event("1"), create_topic(&["a", "b", "c", "d"], false))
            .await;

        assert_eq!(outcome, DispatchOutcome::FannedOut { succeeded: 4, failed: 0 });
        // sequential delivery would take at least 1.2s
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_no_subscribers_persists_when_enabled() {
        let client = Arc::new(MockClient::new(&[]));
        let store = Arc::new(MockStore::default());
        let d = dispatcher(client.clone(), store.clone());
        let event = create_test_event("9");

        let outcome = d.dispatch(event.clone(), create_topic(&[], true)).await;

        assert_eq!(outcome, DispatchOutcome::Persisted(PathBuf::from("/tmp/orders-9.json")));
        assert_eq!(store.persisted.lock().as_slice(), &[(*event).clone()]);
        assert!(client.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_no_subscribers_drops_when_disabled() {
        let client = Arc::new(MockClient::new(&[]));
        let store = Arc::new(MockStore::default());
        let d = dispatcher(client.clone(), store.clone());

        let outcome = d.dispatch(create_test_event("9"), create_topic(&[], false)).await;

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(store.persisted.lock().is_empty());
        assert!(client.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_absorbed() {
        let store = Arc::new(MockStore { fail: true, ..Default::default() });
        let d = dispatcher(Arc::new(MockClient::new(&[])), store);

        let outcome = d.dispatch(create_test_event("9"), create_topic(&[], true)).await;

        assert_eq!(outcome, DispatchOutcome::PersistenceFailed);
    }

    #[tokio::test]
    async fn test_event_is_not_mutated() {
        let client = Arc::new(MockClient::new(&[]));
        let d = dispatcher(client, Arc::new(MockStore::default()));
        let event = create_test_event("1");
        let before = (*event).clone();

        d.dispatch(event.clone(), create_topic(&["a", "b"], false)).await;

        assert_eq!(*event, before);
    }
}
