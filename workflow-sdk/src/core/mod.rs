//! Core abstractions for the Workflow SDK
//!
//! This module provides the fundamental trait interfaces shared by the
//! dispatcher, the test double and calling code:
//!
//! - `Payload`: what a work item must expose to be dispatched
//! - `ResponseHandler`: receives out-of-band replies in async mode
//! - `WorkflowClient`: the dispatch contract
//! - `DispatcherBuilder`: Builder pattern for creating dispatchers

pub mod builder;
pub use builder::DispatcherBuilder;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WorkflowError};
use crate::mapping::{RawReply, Response, ResponseTarget};

/// HTTP method used to deliver a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMethod {
    /// Payload sent as query string
    Get,
    /// Payload sent as a JSON body
    #[default]
    PostJson,
    /// Payload sent as an url-encoded form
    PostForm,
    /// Payload sent as a JSON body with PUT
    Put,
    /// Payload sent as a JSON body with PATCH
    Patch,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::PostJson => write!(f, "POST_JSON"),
            Self::PostForm => write!(f, "POST_FORM"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
        }
    }
}

/// How the caller waits for the workflow's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    /// Return after the transport acknowledged the call
    #[default]
    FireAndForget,
    /// The reply arrives later through a webhook delivery
    Async,
    /// Wait for a direct reply up to a deadline
    Sync,
}

impl CommunicationMode {
    /// Wire name, sent in the `X-Communication-Mode` header
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FireAndForget => "fire_and_forget",
            Self::Async => "async",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item that can be dispatched to a workflow
pub trait Payload: Send + Sync {
    /// Typed result the reply is mapped onto. Use `()` when no mapping is wanted.
    type Output: Send + 'static;

    /// Serialize the payload into the request body
    fn to_body(&self) -> Result<Map<String, Value>>;

    /// HTTP method used to deliver the payload
    fn request_method(&self) -> RequestMethod {
        RequestMethod::PostJson
    }

    /// How to decode the reply, if a typed result is wanted
    fn response_target(&self) -> Option<ResponseTarget<Self::Output>> {
        None
    }
}

/// Serialize any serde value into a request body.
///
/// Fails with a validation error unless the value serializes to a JSON
/// object.
pub fn serialize_body<S: Serialize + ?Sized>(value: &S) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(WorkflowError::validation(format!(
            "Payload must serialize to a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Payload wrapper for plain serde values with default settings
#[derive(Debug, Clone)]
pub struct JsonPayload<S> {
    body: S,
    method: RequestMethod,
}

impl<S: Serialize + Send + Sync> JsonPayload<S> {
    /// Wrap a serializable value
    pub fn new(body: S) -> Self {
        Self {
            body,
            method: RequestMethod::PostJson,
        }
    }

    /// Override the request method
    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }
}

impl<S: Serialize + Send + Sync> Payload for JsonPayload<S> {
    type Output = ();

    fn to_body(&self) -> Result<Map<String, Value>> {
        serialize_body(&self.body)
    }

    fn request_method(&self) -> RequestMethod {
        self.method
    }
}

/// Receives the out-of-band reply of an async dispatch
pub trait ResponseHandler: Send + Sync {
    /// Called once with the reply and the identifier returned by `send_with_callback`
    fn on_response(&self, raw_reply: &RawReply, identifier: &str);
}

impl<F> ResponseHandler for F
where
    F: Fn(&RawReply, &str) + Send + Sync,
{
    fn on_response(&self, raw_reply: &RawReply, identifier: &str) {
        self(raw_reply, identifier)
    }
}

/// Dispatch contract implemented by the HTTP dispatcher and the test double
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Dispatch in the given mode and return once the attempt sequence finishes
    async fn send_with_mode<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        mode: CommunicationMode,
    ) -> Result<Response<P::Output>>
    where
        P: Payload;

    /// Fire-and-forget dispatch
    async fn send<P>(&self, payload: &P, workflow_id: &str) -> Result<Response<P::Output>>
    where
        P: Payload,
    {
        self.send_with_mode(payload, workflow_id, CommunicationMode::FireAndForget)
            .await
    }

    /// Dispatch in async mode; `handler` is invoked when the reply arrives.
    /// Returns the request identifier.
    async fn send_with_callback<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<String>
    where
        P: Payload;

    /// Dispatch and wait for a direct reply, bounded by `timeout` across all attempts
    async fn send_sync<P>(
        &self,
        payload: &P,
        workflow_id: &str,
        timeout: Duration,
    ) -> Result<Response<P::Output>>
    where
        P: Payload;
}

/// Check a workflow identifier before anything is dispatched
pub fn validate_workflow_id(workflow_id: &str) -> Result<()> {
    if workflow_id.trim().is_empty() {
        return Err(WorkflowError::validation("Workflow id must not be empty"));
    }

    if workflow_id
        .chars()
        .any(|c| c.is_whitespace() || c == '?' || c == '#')
    {
        return Err(WorkflowError::validation(format!(
            "Workflow id contains invalid characters: {:?}",
            workflow_id
        )));
    }

    Ok(())
}
