//! Workflow dispatcher
//!
//! `WorkflowDispatcher` composes the resilience layer, the request tracker
//! and the response mapper around a [`Transport`] for each communication
//! mode. It is the component calling code holds on to.

mod transport;
mod webhook;

pub use transport::{
    parse_reply, HttpTransport, OutboundRequest, Transport, TransportReply, CALLBACK_URL_HEADER, MODE_HEADER,
    REQUEST_ID_HEADER,
};
pub use webhook::{DeliveryOutcome, WebhookDelivery, WebhookReceiver};

#[cfg(test)]
pub use transport::MockTransport;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{validate_workflow_id, CommunicationMode, Payload, ResponseHandler, WorkflowClient};
use crate::error::{ErrorKind, Result, WorkflowError};
use crate::mapping::{Response, ResponseMapper};
use crate::resilience::{CircuitBreakerStatus, Resilience};
use crate::tracking::{Request, RequestTracker};
use crate::util::generate_request_id;

/// Per-dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Calls that passed validation and were tracked
    dispatched: AtomicU64,

    /// Calls that ended with a reply
    succeeded: AtomicU64,

    /// Calls that ended with an error other than circuit-open or timeout
    failed: AtomicU64,

    /// Calls rejected by the circuit breaker
    rejected: AtomicU64,

    /// Sync calls that hit their deadline
    timed_out: AtomicU64,

    /// Transport attempts made
    attempts: AtomicU64,
}

impl DispatchMetrics {
    fn record_outcome(&self, outcome: &Result<impl Sized>) {
        let counter = match outcome {
            Ok(_) => &self.succeeded,
            Err(err) => match err.kind() {
                ErrorKind::CircuitOpen => &self.rejected,
                ErrorKind::Timeout => &self.timed_out,
                _ => &self.failed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of tracked dispatches
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Number of transport attempts
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Get all metrics as a map
    pub fn as_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("dispatched".to_string(), self.dispatched().to_string());
        map.insert("succeeded".to_string(), self.succeeded.load(Ordering::Relaxed).to_string());
        map.insert("failed".to_string(), self.failed.load(Ordering::Relaxed).to_string());
        map.insert("rejected".to_string(), self.rejected.load(Ordering::Relaxed).to_string());
        map.insert("timed_out".to_string(), self.timed_out.load(Ordering::Relaxed).to_string());
        map.insert("attempts".to_string(), self.attempts().to_string());

        map
    }
}

/// Outcome of the shared dispatch path, before mapping
struct Dispatched {
    identifier: String,
    reply: TransportReply,
}

/// Resilient dispatcher for a single workflow engine endpoint
pub struct WorkflowDispatcher {
    transport: Arc<dyn Transport>,
    resilience: Resilience,
    tracker: Arc<RequestTracker>,
    callback_url: Option<String>,
    sync_timeout: Duration,
    metrics: DispatchMetrics,
}

impl fmt::Debug for WorkflowDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDispatcher")
            .field("resilience", &self.resilience)
            .field("tracker", &self.tracker)
            .field("callback_url", &self.callback_url)
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

impl WorkflowDispatcher {
    /// Create a dispatcher from its parts. Most callers use [`crate::DispatcherBuilder`].
    pub fn new(
        transport: Arc<dyn Transport>,
        resilience: Resilience,
        tracker: Arc<RequestTracker>,
        callback_url: Option<String>,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            resilience,
            tracker,
            callback_url,
            sync_timeout,
            metrics: DispatchMetrics::default(),
        }
    }

    /// Create a new builder
    pub fn builder() -> crate::DispatcherBuilder {
        crate::DispatcherBuilder::new()
    }

    /// The request tracker shared with the webhook receiver
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// A receiver for inbound webhook deliveries of this dispatcher
    pub fn webhook_receiver(&self) -> WebhookReceiver {
        WebhookReceiver::new(Arc::clone(&self.tracker))
    }

    /// The resilience facade
    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// Current circuit breaker status
    pub fn circuit_status(&self) -> CircuitBreakerStatus {
        self.resilience.circuit_breaker_status()
    }

    /// Dispatch counters
    pub fn dispatch_metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Dispatcher metrics, including breaker status and tracker size
    pub fn metrics(&self) -> HashMap<String, String> {
        let mut map = self.metrics.as_map();
        let breaker = self.resilience.circuit_breaker().metrics();

        map.insert("circuit_status".to_string(), breaker.status.to_string());
        map.insert("circuit_failures".to_string(), breaker.failure_count.to_string());
        map.insert("tracked_requests".to_string(), self.tracker.len().to_string());

        map
    }

    /// Shared dispatch path for every mode.
    ///
    /// Tracks the request, runs the resilient attempt sequence (bounded by
    /// `deadline` when given) and releases the tracker entry unless the
    /// request is waiting for a webhook delivery.
    ///
    /// An async request waits for a webhook only when a callback URL is
    /// configured or the engine answered with an empty body. Otherwise the
    /// inline reply completes it and its handler runs before returning.
    async fn dispatch<P: Payload>(
        &self,
        payload: &P,
        workflow_id: &str,
        mode: CommunicationMode,
        handler: Option<Arc<dyn ResponseHandler>>,
        deadline: Option<Duration>,
    ) -> Result<Dispatched> {
        validate_workflow_id(workflow_id)?;
        let body = payload.to_body()?;
        let method = payload.request_method();

        let identifier = generate_request_id();
        let request = Request::new(identifier.clone(), workflow_id, body.clone(), mode, method);
        self.tracker.track(request, handler)?;
        let guard = self.tracker.guard(identifier.clone());
        self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);

        debug!(request_id = %identifier, %workflow_id, %mode, %method, "Dispatching to workflow");

        let outbound = OutboundRequest {
            identifier: identifier.clone(),
            workflow_id: workflow_id.to_string(),
            mode,
            method,
            body,
            callback_url: match mode {
                CommunicationMode::Async => self.callback_url.clone(),
                _ => None,
            },
        };

        let transport = &self.transport;
        let outbound = &outbound;
        let attempts = &self.metrics.attempts;
        let attempt_sequence = async {
            self.resilience
                .execute(move |attempt| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    debug!(request_id = %outbound.identifier, attempt, "Transport attempt");
                    transport.dispatch(outbound)
                })
                .await
                .map_err(WorkflowError::into_communication)
        };

        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, attempt_sequence).await {
                Ok(outcome) => outcome,
                Err(_) => Err(WorkflowError::timeout(format!(
                    "No reply from workflow {} within {}ms",
                    workflow_id,
                    deadline.as_millis()
                ))),
            },
            None => attempt_sequence.await,
        };

        self.metrics.record_outcome(&outcome);

        match outcome {
            Ok(reply) => {
                match mode {
                    CommunicationMode::Async if self.callback_url.is_some() || reply.body.is_empty() => {
                        debug!(request_id = %identifier, "Awaiting webhook delivery");
                        guard.hand_over();
                    }
                    CommunicationMode::Async => {
                        if let Some(tracked) = guard.complete(&reply.body) {
                            let delivery = webhook::run_handler(tracked, &reply.body);
                            debug!(request_id = %identifier, ?delivery, "Async reply arrived inline");
                        }
                    }
                    _ => {
                        guard.complete(&reply.body);
                    }
                }
                Ok(Dispatched { identifier, reply })
            }
            Err(err) => {
                warn!(request_id = %identifier, %workflow_id, %mode, error = %err, "Dispatch failed");
                guard.fail(&err);
                Err(err.with_request_id(identifier))
            }
        }
    }
}

#[async_trait]
impl WorkflowClient for WorkflowDispatcher {
    async fn send_with_mode<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        mode: CommunicationMode,
    ) -> Result<Response<P::Output>>
    where
        P: Payload,
    {
        let deadline = match mode {
            CommunicationMode::Sync => Some(self.sync_timeout),
            _ => None,
        };

        let Dispatched { identifier, reply } = self.dispatch(payload, workflow_id, mode, None, deadline).await?;
        let mapped = ResponseMapper::map(&reply.body, payload.response_target().as_ref());

        Ok(Response::new(identifier, reply.body, mapped, reply.status_code))
    }

    async fn send_with_callback<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<String>
    where
        P: Payload,
    {
        let Dispatched { identifier, .. } = self
            .dispatch(payload, workflow_id, CommunicationMode::Async, Some(handler), None)
            .await?;

        Ok(identifier)
    }

    async fn send_sync<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        timeout: Duration,
    ) -> Result<Response<P::Output>>
    where
        P: Payload,
    {
        let Dispatched { identifier, reply } = self
            .dispatch(payload, workflow_id, CommunicationMode::Sync, None, Some(timeout))
            .await?;
        let mapped = ResponseMapper::map(&reply.body, payload.response_target().as_ref());

        Ok(Response::new(identifier, reply.body, mapped, reply.status_code))
    }
}
