//! Inbound webhook delivery
//!
//! The surrounding application receives the engine's callback on its own
//! HTTP route and hands the body to [`WebhookReceiver`]. Delivery never
//! fails towards the caller: problems are logged and reported as a
//! [`DeliveryOutcome`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::mapping::RawReply;
use crate::tracking::{RequestTracker, TrackedRequest};
use crate::util::{sanitize_for_logging, truncate_string};

/// An inbound reply for an earlier async dispatch
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookDelivery {
    /// Identifier returned by the dispatch
    #[serde(alias = "request_id", alias = "requestId")]
    pub identifier: String,

    /// The reply
    #[serde(default, alias = "rawReply", alias = "data")]
    pub raw_reply: RawReply,
}

impl WebhookDelivery {
    pub fn new(identifier: impl Into<String>, raw_reply: RawReply) -> Self {
        Self {
            identifier: identifier.into(),
            raw_reply,
        }
    }
}

/// What happened to an inbound delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The request was completed and its handler ran
    Delivered,
    /// The request was completed; no handler was registered
    Completed,
    /// No tracked request has this identifier (unknown, already completed or expired)
    Unknown,
    /// The request was completed but its handler panicked
    HandlerPanicked,
    /// The inbound body could not be parsed
    Rejected,
}

/// Routes webhook deliveries to tracked requests and their handlers
#[derive(Debug, Clone)]
pub struct WebhookReceiver {
    tracker: Arc<RequestTracker>,
}

impl WebhookReceiver {
    /// Create a receiver over a dispatcher's tracker
    pub fn new(tracker: Arc<RequestTracker>) -> Self {
        Self { tracker }
    }

    /// Complete the tracked request and invoke its handler
    pub fn deliver(&self, delivery: WebhookDelivery) -> DeliveryOutcome {
        let WebhookDelivery { identifier, raw_reply } = delivery;

        let Some(tracked) = self.tracker.complete(&identifier, &raw_reply) else {
            warn!(request_id = %identifier, "Webhook delivery for unknown request");
            return DeliveryOutcome::Unknown;
        };

        run_handler(tracked, &raw_reply)
    }

    /// Parse an inbound JSON body and deliver it
    pub fn deliver_json(&self, body: &str) -> DeliveryOutcome {
        match serde_json::from_str::<WebhookDelivery>(body) {
            Ok(delivery) => self.deliver(delivery),
            Err(e) => {
                warn!(error = %e, body = %truncate_string(&sanitize_for_logging(body), 120), "Rejected malformed webhook delivery");
                DeliveryOutcome::Rejected
            }
        }
    }

    /// The tracker deliveries are routed through
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }
}

/// Invoke the handler of a completed request, containing panics
pub(crate) fn run_handler(tracked: TrackedRequest, raw_reply: &RawReply) -> DeliveryOutcome {
    let identifier = &tracked.request.identifier;
    let workflow_id = &tracked.request.workflow_id;

    let Some(handler) = tracked.handler else {
        debug!(request_id = %identifier, "Reply completed request without handler");
        return DeliveryOutcome::Completed;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| handler.on_response(raw_reply, identifier))) {
        Ok(()) => {
            debug!(request_id = %identifier, %workflow_id, "Reply delivered to handler");
            DeliveryOutcome::Delivered
        }
        Err(_) => {
            error!(request_id = %identifier, %workflow_id, "Response handler panicked");
            DeliveryOutcome::HandlerPanicked
        }
    }
}
