//! In-memory test double for [`WorkflowClient`]
//!
//! `MockWorkflowClient` records every call, answers from a FIFO queue of
//! canned replies and never touches the network. Async callbacks run
//! inline, before `send_with_callback` returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::core::{validate_workflow_id, CommunicationMode, Payload, RequestMethod, ResponseHandler, WorkflowClient};
use crate::error::{Result, WorkflowError};
use crate::mapping::{RawReply, Response, ResponseMapper};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub identifier: String,
    pub mode: CommunicationMode,
    pub workflow_id: String,
    pub method: RequestMethod,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A failed expectation on the call log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionFailure {
    #[error("Expected a call to workflow {workflow_id}, but none was made")]
    NotSent { workflow_id: String },

    #[error("Expected a call matching the predicate, but none of {total} calls matched")]
    NoMatchingCall { total: usize },

    #[error("Expected no call to workflow {workflow_id}, but {actual} were made")]
    UnexpectedCall { workflow_id: String, actual: usize },

    #[error("Expected no call matching the predicate, but {actual} matched")]
    UnexpectedMatchingCall { actual: usize },

    #[error("Expected {expected} calls to workflow {workflow_id}, but {actual} were made")]
    CountMismatch {
        workflow_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expected a call to workflow {workflow_id} with payload containing {expected}")]
    PayloadMismatch { workflow_id: String, expected: String },
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<RawReply>,
    pending_failure: Option<WorkflowError>,
    calls: Vec<CallRecord>,
    next_id: u64,
}

/// Network-free [`WorkflowClient`] with a call log and assertions
#[derive(Default)]
pub struct MockWorkflowClient {
    state: Mutex<MockState>,
}

impl MockWorkflowClient {
    /// Create a mock with an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reply returned when the queue is empty
    pub fn default_reply() -> RawReply {
        match json!({"status": "ok", "message": "Mock response"}) {
            Value::Object(map) => map,
            _ => RawReply::new(),
        }
    }

    /// Queue a reply for the next call
    pub fn queue_reply(&self, reply: RawReply) -> &Self {
        self.state().replies.push_back(reply);
        self
    }

    /// Queue several replies, consumed in order
    pub fn queue_replies(&self, replies: impl IntoIterator<Item = RawReply>) -> &Self {
        self.state().replies.extend(replies);
        self
    }

    /// Make the next call fail with `error`. Consumed by exactly one call.
    ///
    /// Only calls that pass validation count: a call rejected for its
    /// workflow id or payload is neither recorded nor consumes the failure,
    /// which stays pending for the following valid call.
    pub fn fail_next(&self, error: WorkflowError) -> &Self {
        self.state().pending_failure = Some(error);
        self
    }

    /// All recorded calls, oldest first
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    /// The most recent call
    pub fn last_call(&self) -> Option<CallRecord> {
        self.state().calls.last().cloned()
    }

    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Clear the call log, the reply queue, the pending failure and the id counter
    pub fn reset(&self) {
        *self.state() = MockState::default();
    }

    /// At least one call to `workflow_id` was made
    pub fn assert_sent(&self, workflow_id: &str) -> std::result::Result<(), AssertionFailure> {
        match self.count_for(workflow_id) {
            0 => Err(AssertionFailure::NotSent {
                workflow_id: workflow_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// At least one call satisfies `predicate`
    pub fn assert_sent_where<F>(&self, predicate: F) -> std::result::Result<(), AssertionFailure>
    where
        F: Fn(&CallRecord) -> bool,
    {
        let state = self.state();
        if state.calls.iter().any(predicate) {
            Ok(())
        } else {
            Err(AssertionFailure::NoMatchingCall {
                total: state.calls.len(),
            })
        }
    }

    /// No call to `workflow_id` was made
    pub fn assert_not_sent(&self, workflow_id: &str) -> std::result::Result<(), AssertionFailure> {
        match self.count_for(workflow_id) {
            0 => Ok(()),
            actual => Err(AssertionFailure::UnexpectedCall {
                workflow_id: workflow_id.to_string(),
                actual,
            }),
        }
    }

    /// No call satisfies `predicate`
    pub fn assert_not_sent_where<F>(&self, predicate: F) -> std::result::Result<(), AssertionFailure>
    where
        F: Fn(&CallRecord) -> bool,
    {
        match self.state().calls.iter().filter(|&call| predicate(call)).count() {
            0 => Ok(()),
            actual => Err(AssertionFailure::UnexpectedMatchingCall { actual }),
        }
    }

    /// Exactly `expected` calls to `workflow_id` were made
    pub fn assert_sent_times(&self, workflow_id: &str, expected: usize) -> std::result::Result<(), AssertionFailure> {
        let actual = self.count_for(workflow_id);
        if actual == expected {
            Ok(())
        } else {
            Err(AssertionFailure::CountMismatch {
                workflow_id: workflow_id.to_string(),
                expected,
                actual,
            })
        }
    }

    /// Some call to `workflow_id` carried a payload containing `expected`.
    ///
    /// Objects match when every expected key is present with a matching
    /// value; nested objects are compared the same way, other values exactly.
    pub fn assert_payload_contains(&self, workflow_id: &str, expected: &Value) -> std::result::Result<(), AssertionFailure> {
        let found = self
            .state()
            .calls
            .iter()
            .filter(|call| call.workflow_id == workflow_id)
            .any(|call| json_contains(&Value::Object(call.payload.clone()), expected));

        if found {
            Ok(())
        } else {
            Err(AssertionFailure::PayloadMismatch {
                workflow_id: workflow_id.to_string(),
                expected: expected.to_string(),
            })
        }
    }

    fn count_for(&self, workflow_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.workflow_id == workflow_id)
            .count()
    }

    /// Record the call and produce its reply or the injected failure.
    ///
    /// Validation runs first so an invalid call leaves the injected failure pending.
    fn record<P: Payload>(&self, payload: &P, workflow_id: &str, mode: CommunicationMode) -> Result<(String, RawReply)> {
        validate_workflow_id(workflow_id)?;
        let body = payload.to_body()?;

        let mut state = self.state();
        state.next_id += 1;
        let identifier = format!("mock-id-{}", state.next_id);

        debug!(request_id = %identifier, %workflow_id, %mode, "Mock dispatch");
        state.calls.push(CallRecord {
            identifier: identifier.clone(),
            mode,
            workflow_id: workflow_id.to_string(),
            method: payload.request_method(),
            payload: body,
            timestamp: Utc::now(),
        });

        if let Some(error) = state.pending_failure.take() {
            return Err(error.with_request_id(identifier));
        }

        let reply = state.replies.pop_front().unwrap_or_else(Self::default_reply);
        Ok((identifier, reply))
    }
}

fn json_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, expected)| {
            actual
                .get(key)
                .map_or(false, |actual| json_contains(actual, expected))
        }),
        (actual, expected) => actual == expected,
    }
}

#[async_trait]
impl WorkflowClient for MockWorkflowClient {
    async fn send_with_mode<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        mode: CommunicationMode,
    ) -> Result<Response<P::Output>>
    where
        P: Payload,
    {
        let (identifier, reply) = self.record(payload, workflow_id, mode)?;
        let mapped = ResponseMapper::map(&reply, payload.response_target().as_ref());

        Ok(Response::new(identifier, reply, mapped, 200))
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
        let (identifier, reply) = self.record(payload, workflow_id, CommunicationMode::Async)?;
        handler.on_response(&reply, &identifier);

        Ok(identifier)
    }

    async fn send_sync<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        _timeout: Duration,
    ) -> Result<Response<P::Output>>
    where
        P: Payload,
    {
        self.send_with_mode(payload, workflow_id, CommunicationMode::Sync)
            .await
    }
}
