//! Reply mapping
//!
//! Turns the open-ended key/value reply of the workflow engine into a typed
//! value the caller asked for. Mapping is best-effort: a reply that does not
//! decode leaves the response without a mapped value instead of failing the
//! dispatch.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, WorkflowError};

/// Raw reply of the workflow engine
pub type RawReply = Map<String, Value>;

type DecodeFn<T> = dyn Fn(&RawReply) -> Result<T> + Send + Sync;

/// Describes how to decode a raw reply into `T`.
///
/// Use [`ResponseTarget::deserialize`] for any serde type (field defaults
/// come from `#[serde(default)]`), or [`ResponseTarget::from_fn`] for a
/// hand-written decoder.
pub struct ResponseTarget<T> {
    name: &'static str,
    decode: Arc<DecodeFn<T>>,
}

impl<T> Clone for ResponseTarget<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<T> fmt::Debug for ResponseTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseTarget").field("name", &self.name).finish()
    }
}

impl<T: DeserializeOwned + 'static> ResponseTarget<T> {
    /// Decode by matching reply keys to the fields of `T`
    pub fn deserialize() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            decode: Arc::new(|raw: &RawReply| {
                serde_json::from_value(Value::Object(raw.clone()))
                    .map_err(|e| WorkflowError::mapping(e.to_string()))
            }),
        }
    }
}

impl<T> ResponseTarget<T> {
    /// Decode with a custom function
    pub fn from_fn<F>(name: &'static str, decode: F) -> Self
    where
        F: Fn(&RawReply) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name,
            decode: Arc::new(decode),
        }
    }

    /// Name of the target, used in logs
    pub fn name(&self) -> &str {
        self.name
    }

    fn decode(&self, raw: &RawReply) -> Result<T> {
        (self.decode)(raw)
    }
}

/// Maps raw replies onto response targets
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseMapper;

impl ResponseMapper {
    /// Map a raw reply. Returns `None` when no target is given or decoding
    /// fails.
    pub fn map<T>(raw: &RawReply, target: Option<&ResponseTarget<T>>) -> Option<T> {
        let target = target?;

        match target.decode(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(target_type = target.name(), error = %err, "Reply did not map onto target type");
                None
            }
        }
    }
}

/// Result of a dispatch
#[derive(Debug, Clone)]
pub struct Response<T> {
    identifier: String,
    raw_reply: RawReply,
    mapped: Option<T>,
    status_code: u16,
    success: bool,
}

impl<T> Response<T> {
    /// Build a response from a transport reply
    pub fn new(identifier: impl Into<String>, raw_reply: RawReply, mapped: Option<T>, status_code: u16) -> Self {
        Self {
            identifier: identifier.into(),
            raw_reply,
            mapped,
            success: (200..300).contains(&status_code),
            status_code,
        }
    }

    /// Identifier of the tracked request
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The reply as received
    pub fn raw_reply(&self) -> &RawReply {
        &self.raw_reply
    }

    /// Look up a single key of the raw reply
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw_reply.get(key)
    }

    /// The typed value, when the payload asked for one and the reply decoded
    pub fn mapped(&self) -> Option<&T> {
        self.mapped.as_ref()
    }

    /// Take the typed value out of the response
    pub fn into_mapped(self) -> Option<T> {
        self.mapped
    }

    /// HTTP status code of the reply
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Whether the dispatch succeeded
    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn raw(value: Value) -> RawReply {
        match value {
            Value::Object(map) => map,
            _ => panic!("test replies are objects"),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Review {
        status: String,
        message: String,
        timestamp: i64,
    }

    #[test]
    fn test_matching_fields_are_mapped() {
        let reply = raw(json!({"status": "ok", "message": "looks good", "timestamp": 1234567890}));
        let target = ResponseTarget::<Review>::deserialize();

        let review = ResponseMapper::map(&reply, Some(&target)).unwrap();

        assert_eq!(
            review,
            Review {
                status: "ok".to_string(),
                message: "looks good".to_string(),
                timestamp: 1234567890,
            }
        );
    }

    #[test]
    fn test_missing_required_fields_map_to_none() {
        let reply = raw(json!({"status": "ok"}));
        let target = ResponseTarget::<Review>::deserialize();

        assert!(ResponseMapper::map(&reply, Some(&target)).is_none());
    }

    #[test]
    fn test_defaults_fill_unmatched_fields() {
        #[derive(Debug, Deserialize)]
        struct Score {
            score: u32,
            #[serde(default = "default_grade")]
            grade: String,
        }

        fn default_grade() -> String {
            "ungraded".to_string()
        }

        let reply = raw(json!({"score": 95, "unrelated": true}));
        let score = ResponseMapper::map(&reply, Some(&ResponseTarget::<Score>::deserialize())).unwrap();

        assert_eq!(score.score, 95);
        assert_eq!(score.grade, "ungraded");
    }

    #[test]
    fn test_no_target_maps_to_none() {
        let reply = raw(json!({"status": "ok"}));
        assert!(ResponseMapper::map::<Review>(&reply, None).is_none());
    }

    #[test]
    fn test_custom_decoder() {
        let target = ResponseTarget::from_fn("score", |raw: &RawReply| {
            raw.get("score")
                .and_then(Value::as_u64)
                .ok_or_else(|| WorkflowError::mapping("no score"))
        });

        assert_eq!(ResponseMapper::map(&raw(json!({"score": 95})), Some(&target)), Some(95));
        assert_eq!(ResponseMapper::map(&raw(json!({"grade": "A"})), Some(&target)), None);
    }

    #[test]
    fn test_success_derived_from_status() {
        let ok: Response<()> = Response::new("id-1", RawReply::new(), None, 204);
        let failed: Response<()> = Response::new("id-2", RawReply::new(), None, 500);

        assert!(ok.is_success());
        assert!(!failed.is_success());
    }
}
