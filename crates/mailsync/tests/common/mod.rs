//! Shared test utilities for mailsync integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a coordinator to an in-memory store
//! - Scripted transport and draft service doubles
//! - Builders for items, batches and settings

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
