//! # Workflow SDK
//!
//! A resilient dispatch client for external workflow-automation engines in
//! the Phoenix ORCH project.
//!
//! This crate provides:
//!
//! - Mode-aware dispatch (fire-and-forget, async with callback, sync)
//! - Resilience patterns (retries, circuit breaker)
//! - Request tracking that correlates async replies with their request
//! - Typed mapping of raw replies
//! - Configuration management utilities
//! - An in-memory test double of the dispatch contract
//!
//! ## Architecture
//!
//! The SDK is designed around the following key abstractions:
//!
//! - `WorkflowClient`: the dispatch contract
//! - `Payload`: what a work item exposes to be dispatched
//! - `WorkflowDispatcher`: the HTTP implementation, built by `DispatcherBuilder`
//! - `Resilience`: facade for retry and circuit breaking
//! - `RequestTracker` / `WebhookReceiver`: correlation of out-of-band replies
//! - `WorkflowError`: comprehensive error handling system

// Re-export core modules
pub mod core;
pub use crate::core::{
    CommunicationMode, DispatcherBuilder, JsonPayload, Payload, RequestMethod, ResponseHandler, WorkflowClient,
};

// Dispatcher, transport and webhook intake
pub mod client;
pub use client::{WebhookDelivery, WebhookReceiver, WorkflowDispatcher};

// Re-export error handling
pub mod error;
pub use error::{ErrorContext, ErrorKind, Result, WorkflowError};

// Re-export resilience patterns
pub mod resilience;
pub use resilience::{CircuitBreaker, CircuitBreakerStatus, Resilience, RetryExecutor};

pub mod tracking;
pub use tracking::{Request, RequestStatus, RequestTracker};

pub mod mapping;
pub use mapping::{RawReply, Response, ResponseMapper, ResponseTarget};

// Re-export configuration management
pub mod config;
pub use config::{ConfigProvider, WorkflowConfig};

pub mod testing;
pub use testing::MockWorkflowClient;

// Utility module for common functionality
mod util;

#[cfg(test)]
mod tests;

/// Create a new default dispatcher builder
pub fn dispatcher() -> DispatcherBuilder {
    DispatcherBuilder::new()
}
