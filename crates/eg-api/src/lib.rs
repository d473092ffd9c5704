//! Event Grid Simulator API
//!
//! HTTP ingestion endpoint shared by every topic listener:
//! - `POST /api/events` accepts a JSON array of events
//!
//! The topic is picked from the local port the connection was accepted on,
//! so the same router serves all listeners.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{connect_info::Connected, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    serve::IncomingStream,
    Json, Router,
};
use eg_common::{Event, SimulatorError};
use eg_router::{Dispatcher, TopicRegistry};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

/// Application state shared across listeners
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TopicRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Local port of the listener that accepted a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerPort(pub u16);

impl Connected<IncomingStream<'_>> for ListenerPort {
    fn connect_info(target: IncomingStream<'_>) -> Self {
        // Port 0 is never bound to a topic, so a failed lookup surfaces as TopicNotFound
        ListenerPort(target.local_addr().map(|addr| addr.port()).unwrap_or_default())
    }
}

/// Error body, shaped like the upstream platform's error responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Errors visible to the publisher
#[derive(Debug)]
pub struct ApiError(SimulatorError);

impl From<SimulatorError> for ApiError {
    fn from(e: SimulatorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            SimulatorError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError"),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.0.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Create the ingestion router
pub fn create_router(registry: Arc<TopicRegistry>, dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState {
        registry,
        dispatcher,
    };

    Router::new()
        .route("/api/events", post(publish_events))
        .with_state(state)
}

/// Accept a batch of events and dispatch each one.
///
/// Responds once every event has been routed and every subscriber delivery
/// has finished, whatever their outcome.
async fn publish_events(
    State(state): State<AppState>,
    ConnectInfo(ListenerPort(port)): ConnectInfo<ListenerPort>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let topic = state.registry.resolve(port).map_err(|e| {
        error!(port = port, error = %e, "Request received on a listener with no topic");
        e
    })?;

    let events = Event::parse_batch(&body).map_err(|e| {
        warn!(topic = %topic.name, error = %e, "Rejected malformed event batch");
        e
    })?;

    let span = info_span!(
        "publish",
        request_id = %Uuid::new_v4(),
        topic = %topic.name,
        events = events.len()
    );

    async move {
        let dispatches = events.into_iter().map(|event| {
            state
                .dispatcher
                .dispatch(Arc::new(event), topic.clone())
        });
        join_all(dispatches).await;
    }
    .instrument(span)
    .await;

    Ok(StatusCode::OK)
}
