//! # Station Archive Common Library
//!
//! Shared code for the station archive services including:
//! - Error type and result alias
//! - Bootstrap configuration loading and stations-root resolution
//! - Event types (StreamEvent, ArchiveEvent) and the EventBus
//! - SSE helpers
//! - Correlation id generation

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
