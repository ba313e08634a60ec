//! HTTP API handlers for archive-history
//!
//! REST endpoints over the History Service plus an SSE stream of record
//! lifecycle events.

pub mod health;
pub mod history;
pub mod media;
pub mod sse;

pub use health::health_routes;
pub use history::history_routes;
pub use media::media_routes;
pub use sse::event_stream;

use serde::Deserialize;

use crate::path_resolver::StationContext;

/// `?folder=` / `?title=` station selector shared by several endpoints
#[derive(Debug, Default, Deserialize)]
pub struct StationQuery {
    pub folder: Option<String>,
    pub title: Option<String>,
}

impl StationQuery {
    pub fn context(&self) -> StationContext {
        StationContext {
            folder: self.folder.clone(),
            title: self.title.clone(),
        }
    }
}
