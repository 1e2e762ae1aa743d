//! Transport to the workflow engine
//!
//! `Transport` performs exactly one delivery attempt. Retry, circuit
//! breaking and tracking live above it in the dispatcher.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::{CommunicationMode, RequestMethod};
use crate::error::mapping::map_http_error;
use crate::error::{ErrorContext, Result};
use crate::mapping::RawReply;

/// Header carrying the request identifier
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Header carrying the communication mode
pub const MODE_HEADER: &str = "X-Communication-Mode";

/// Header carrying the URL async replies should be delivered to
pub const CALLBACK_URL_HEADER: &str = "X-Callback-Url";

/// One request as handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub identifier: String,
    pub workflow_id: String,
    pub mode: CommunicationMode,
    pub method: RequestMethod,
    pub body: Map<String, Value>,
    pub callback_url: Option<String>,
}

/// Successful reply of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReply {
    pub status_code: u16,
    pub body: RawReply,
}

/// Performs a single delivery attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver the request once. Non-2xx replies are errors.
    async fn dispatch(&self, request: &OutboundRequest) -> Result<TransportReply>;
}

/// reqwest based transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport posting to `{base_url}/{workflow_id}`
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL a workflow is reached at
    pub fn endpoint(&self, workflow_id: &str) -> String {
        format!("{}/{}", self.base_url, workflow_id.trim_start_matches('/'))
    }

    fn build_request(&self, url: &str, request: &OutboundRequest) -> RequestBuilder {
        let builder = match request.method {
            RequestMethod::Get => self.client.get(url).query(&form_pairs(&request.body)),
            RequestMethod::PostJson => self.client.post(url).json(&request.body),
            RequestMethod::PostForm => self.client.post(url).form(&form_pairs(&request.body)),
            RequestMethod::Put => self.client.put(url).json(&request.body),
            RequestMethod::Patch => self.client.patch(url).json(&request.body),
        };

        let builder = builder
            .header(REQUEST_ID_HEADER, &request.identifier)
            .header(MODE_HEADER, request.mode.as_str());

        match request.callback_url {
            Some(ref callback_url) => builder.header(CALLBACK_URL_HEADER, callback_url),
            None => builder,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &OutboundRequest) -> Result<TransportReply> {
        let url = self.endpoint(&request.workflow_id);
        debug!(request_id = %request.identifier, method = %request.method, %url, "Sending request to workflow engine");

        let start_time = Instant::now();
        let response = self.build_request(&url, request).send().await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(
            request_id = %request.identifier,
            status = status.as_u16(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Workflow engine replied"
        );

        if !status.is_success() {
            let mut context = ErrorContext::for_source("http_transport")
                .endpoint(url)
                .request_id(request.identifier.clone());
            let error = map_http_error(status, &text, &mut context);
            return Err(error.with_context(context));
        }

        Ok(TransportReply {
            status_code: status.as_u16(),
            body: parse_reply(&text),
        })
    }
}

/// Interpret a reply body as a key/value structure.
///
/// JSON objects are used as-is, other JSON values are wrapped under
/// `data`, non-JSON text under `body`; an empty body is an empty map.
pub fn parse_reply(text: &str) -> RawReply {
    if text.trim().is_empty() {
        return RawReply::new();
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = RawReply::new();
            map.insert("data".to_string(), other);
            map
        }
        Err(_) => {
            let mut map = RawReply::new();
            map.insert("body".to_string(), Value::String(text.to_string()));
            map
        }
    }
}

/// Flatten a body into string pairs for query strings and forms
fn form_pairs(body: &Map<String, Value>) -> Vec<(String, String)> {
    body.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
