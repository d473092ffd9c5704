//! Event Grid Simulator Router
//!
//! This crate provides the routing core of the simulator:
//! - TopicRegistry: read-only mapping from listener port to topic settings
//! - Dispatcher: per-event fan-out to subscribers, or fallback persistence
//! - HttpSubscriberClient: webhook delivery with the `aeg-event-type` header and a per-call timeout
//! - TempFolderStore: one indented JSON file per event for topics without subscribers

pub mod registry;
pub mod delivery;
pub mod fallback;
pub mod dispatcher;

pub use registry::TopicRegistry;
pub use delivery::{
    SubscriberClient, HttpSubscriberClient, HttpSubscriberClientConfig,
    DeliveryOutcome, DeliveryResult, AEG_EVENT_TYPE_HEADER, NOTIFICATION_EVENT_TYPE,
};
pub use fallback::{FallbackStore, TempFolderStore};
pub use dispatcher::{Dispatcher, DispatchOutcome};

pub use eg_common::{Result, SimulatorError};
