//! Unit tests for the Workflow SDK
//!
//! This module contains tests for various components of the SDK.

pub mod mock_client_tests;
pub mod resilience_tests;
