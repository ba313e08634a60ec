//! Correlation id utilities
//!
//! A correlation id ties every chunk/done event of one streamed transfer
//! together. Ids are UUIDv4 strings generated by the requesting side.

use uuid::Uuid;

/// Generate a fresh correlation id
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}
