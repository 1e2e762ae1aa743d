//! Error mapping for workflow engine replies
//!
//! This module converts non-success HTTP replies from the workflow engine
//! into our normalized WorkflowError type and classifies status codes for
//! the retry policy.

use reqwest::StatusCode;
use serde_json::Value;

use super::{ErrorContext, WorkflowError};
use crate::util::{sanitize_for_logging, truncate_string};

/// Longest reply body excerpt kept in an error message
const MAX_BODY_EXCERPT: usize = 200;

/// Map a non-success HTTP reply to a WorkflowError
pub fn map_http_error(status: StatusCode, body: &str, context: &mut ErrorContext) -> WorkflowError {
    context.status_code = Some(status.as_u16());
    context.add("category", classify_http_error(status));

    let message = match serde_json::from_str::<Value>(body) {
        Ok(json) => extract_message(&json).unwrap_or_else(|| excerpt(body)),
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => excerpt(body),
    };

    WorkflowError::http(status.as_u16(), message)
}

/// Pull a human readable message out of a JSON error body
fn extract_message(json: &Value) -> Option<String> {
    let candidate = json
        .get("message")
        .or_else(|| json.get("error"))
        .or_else(|| json.get("hint"))?;

    match candidate {
        Value::String(message) => Some(message.clone()),
        // n8n nests `{"error": {"message": ...}}` for some failures
        Value::Object(inner) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn excerpt(body: &str) -> String {
    truncate_string(&sanitize_for_logging(body), MAX_BODY_EXCERPT)
}

/// Helper function to classify HTTP errors by category
pub fn classify_http_error(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 | 422 => "validation",
        401 => "authentication",
        403 => "authorization",
        404 => "not_found",
        408 => "timeout",
        429 => "rate_limit",
        500..=599 => "server",
        _ => "unknown",
    }
}

/// Determine if an HTTP status code indicates a retryable error
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}
