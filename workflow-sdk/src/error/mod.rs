//! Error handling for the Workflow SDK
//!
//! This module provides the error system shared by the dispatcher, the
//! resilience layer and the test double:
//! - Categorizes errors by kind (validation, communication, circuit open, etc.)
//! - Adds rich context to errors (status code, request id, attempts)
//! - Classifies errors as retryable or permanent
//! - Provides convenient Result type alias

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod mapping;

/// Result type for Workflow SDK operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Main error type for the Workflow SDK
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Malformed payload or workflow identifier. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport or HTTP failure surfaced after the retry policy gave up
    #[error("Communication error: {0}")]
    Communication(String),

    /// The circuit breaker rejected the call without a transport attempt
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// A deadline elapsed (sync-mode wait or a single transport attempt)
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Network or connection errors
    #[error("Network error: {0}")]
    Network(String),

    /// The remote engine answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A reply could not be decoded into the requested target type
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<WorkflowError>,
        context: ErrorContext,
    },
}

/// Discriminant of a [`WorkflowError`], looking through context wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Communication,
    CircuitOpen,
    Timeout,
    Network,
    Http,
    Mapping,
    Configuration,
    Internal,
}

impl WorkflowError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation(message.into())
    }

    /// Create a communication error
    pub fn communication(message: impl Into<String>) -> Self {
        WorkflowError::Communication(message.into())
    }

    /// Create a circuit open error
    pub fn circuit_open(message: impl Into<String>) -> Self {
        WorkflowError::CircuitOpen(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        WorkflowError::Timeout(message.into())
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        WorkflowError::Network(message.into())
    }

    /// Create an HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        WorkflowError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a mapping error
    pub fn mapping(message: impl Into<String>) -> Self {
        WorkflowError::Mapping(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        WorkflowError::Configuration(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        WorkflowError::Internal(message.into())
    }

    /// Add context to an existing error
    pub fn with_context(self, context: ErrorContext) -> Self {
        WorkflowError::WithContext {
            inner: Box::new(self),
            context,
        }
    }

    /// Add a single context key/value to an existing error.
    ///
    /// Values are merged into an existing context rather than nesting a
    /// second wrapper.
    pub fn with_context_value(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        match self {
            WorkflowError::WithContext { inner, mut context } => {
                context.add(key, value);
                WorkflowError::WithContext { inner, context }
            }
            other => {
                let mut context = ErrorContext::new();
                context.add(key, value);
                other.with_context(context)
            }
        }
    }

    /// Attach the identifier of the tracked request
    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        match self {
            WorkflowError::WithContext { inner, context } => WorkflowError::WithContext {
                inner,
                context: context.request_id(id),
            },
            other => other.with_context(ErrorContext::new().request_id(id)),
        }
    }

    /// The error with every context wrapper removed
    pub fn root(&self) -> &WorkflowError {
        match self {
            WorkflowError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// The kind of the innermost error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Communication(_) => ErrorKind::Communication,
            WorkflowError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            WorkflowError::Timeout(_) => ErrorKind::Timeout,
            WorkflowError::Network(_) => ErrorKind::Network,
            WorkflowError::Http { .. } => ErrorKind::Http,
            WorkflowError::Mapping(_) => ErrorKind::Mapping,
            WorkflowError::Configuration(_) => ErrorKind::Configuration,
            WorkflowError::Internal(_) | WorkflowError::WithContext { .. } => ErrorKind::Internal,
        }
    }

    /// Get the attached context, if any
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            WorkflowError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            WorkflowError::Http { status, .. } => Some(*status),
            WorkflowError::WithContext { inner, context } => {
                context.status_code.or_else(|| inner.status_code())
            }
            _ => None,
        }
    }

    /// Get the request identifier if available
    pub fn request_id(&self) -> Option<&str> {
        match self {
            WorkflowError::WithContext { inner, context } => {
                context.request_id.as_deref().or_else(|| inner.request_id())
            }
            _ => None,
        }
    }

    /// Look up a context value added with [`WorkflowError::with_context_value`]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        match self {
            WorkflowError::WithContext { inner, context } => context
                .data
                .get(key)
                .map(String::as_str)
                .or_else(|| inner.context_value(key)),
            _ => None,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Network(_) => true,
            WorkflowError::Timeout(_) => true,
            WorkflowError::Http { status, .. } => mapping::is_retryable_status(*status),
            WorkflowError::WithContext { inner, .. } => inner.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a permanent error (not retryable)
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Convert a failed transport outcome into the error surfaced to callers.
    ///
    /// Validation, circuit-open and communication errors pass through
    /// unchanged; everything else becomes a `Communication` error carrying
    /// the wrapped context.
    pub fn into_communication(self) -> Self {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::CircuitOpen | ErrorKind::Communication => self,
            _ => {
                let message = self.root().to_string();
                let status = self.status_code();
                let mut context = match self {
                    WorkflowError::WithContext { context, .. } => context,
                    _ => ErrorContext::new(),
                };
                context.status_code = context.status_code.or(status);

                WorkflowError::communication(message).with_context(context)
            }
        }
    }
}

/// Error context information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component that generated the error
    pub source: String,

    /// Time the error was observed
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Identifier of the tracked request
    pub request_id: Option<String>,

    /// Endpoint that was called
    pub endpoint: Option<String>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            source: "workflow-sdk".to_string(),
            timestamp: Some(chrono::Utc::now()),
            status_code: None,
            request_id: None,
            endpoint: None,
            data: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new error context for a specific component
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Add an HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add a request ID
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Add an endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }

    /// Add a context value and return self (builder pattern)
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.add(key, value);
        self
    }
}

/// Convert reqwest errors to WorkflowError
impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        let context = ErrorContext::for_source("http_client");

        let error = if err.is_timeout() {
            WorkflowError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            WorkflowError::network(format!("Connection error: {}", err))
        } else if err.is_redirect() {
            WorkflowError::network(format!("Too many redirects: {}", err))
        } else if err.is_builder() {
            WorkflowError::validation(format!("Invalid request: {}", err))
        } else if err.is_decode() {
            WorkflowError::network(format!("Response decode error: {}", err))
        } else {
            WorkflowError::network(format!("HTTP client error: {}", err))
        };

        match err.status() {
            Some(status) => error.with_context(context.status_code(status.as_u16())),
            None => error.with_context(context),
        }
    }
}

/// Convert serde_json errors to WorkflowError
impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::validation(format!("JSON error: {}", err))
            .with_context(ErrorContext::for_source("json"))
    }
}
