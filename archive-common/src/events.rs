//! Event types for the station archive
//!
//! Two families of events flow through the system:
//!
//! - [`StreamEvent`]: inbound chunk/done/failed deliveries for one streamed
//!   transfer. These travel over an ordered `mpsc` channel because the
//!   reassembly protocol depends on per-id arrival order.
//! - [`ArchiveEvent`]: record lifecycle notifications broadcast to any
//!   number of listeners (SSE clients) through the [`EventBus`].

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Inbound events of the chunked transfer protocol
///
/// For a given correlation id the backend emits zero or more `Chunk`
/// events followed by exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// One base64 fragment of the payload
    Chunk {
        correlation_id: String,
        data: String,
    },

    /// All fragments for this id have been delivered
    Done { correlation_id: String },

    /// The backend could not produce the payload
    Failed {
        correlation_id: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            StreamEvent::Chunk { correlation_id, .. }
            | StreamEvent::Done { correlation_id }
            | StreamEvent::Failed { correlation_id, .. } => correlation_id,
        }
    }
}

/// Sending half handed to a backend when a stream begins
pub type StreamEventSender = mpsc::UnboundedSender<StreamEvent>;

/// Receiving half drained by the transport dispatcher
pub type StreamEventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Create the channel that carries stream events from backend to transport
pub fn stream_channel() -> (StreamEventSender, StreamEventReceiver) {
    mpsc::unbounded_channel()
}

/// Record category as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordCategory {
    Inspection,
    Construction,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::Inspection => "inspection",
            RecordCategory::Construction => "construction",
        }
    }
}

impl std::fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inspection" | "inspections" => Ok(RecordCategory::Inspection),
            "construction" | "constructions" => Ok(RecordCategory::Construction),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown record category: {}",
                other
            ))),
        }
    }
}

/// Archive lifecycle events
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ArchiveEvent {
    /// A record folder was created
    RecordCreated {
        /// Station folder name
        station: String,
        /// Record folder name
        record: String,
        /// Category the record was created from
        category: RecordCategory,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A record folder was deleted
    RecordDeleted {
        station: String,
        record: String,
        category: RecordCategory,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ArchiveEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ArchiveEvent::RecordCreated { .. } => "RecordCreated",
            ArchiveEvent::RecordDeleted { .. } => "RecordDeleted",
        }
    }
}

/// Broadcast bus for [`ArchiveEvent`]s
///
/// Lagging subscribers lose the oldest events; lifecycle notifications are
/// advisory, so that is acceptable here.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ArchiveEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use archive_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ArchiveEvent,
    ) -> Result<usize, broadcast::error::SendError<ArchiveEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ArchiveEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(record: &str) -> ArchiveEvent {
        ArchiveEvent::RecordCreated {
            station: "BIG_RIVER_05AB001".to_string(),
            record: record.to_string(),
            category: RecordCategory::Inspection,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_stream_event_correlation_id() {
        let chunk = StreamEvent::Chunk {
            correlation_id: "U1".to_string(),
            data: "QQ==".to_string(),
        };
        let done = StreamEvent::Done {
            correlation_id: "U2".to_string(),
        };
        assert_eq!(chunk.correlation_id(), "U1");
        assert_eq!(done.correlation_id(), "U2");
    }

    #[test]
    fn test_archive_event_serializes_with_type_tag() {
        let json = serde_json::to_value(created("2024 Gauge Install")).unwrap();
        assert_eq!(json["type"], "RecordCreated");
        assert_eq!(json["category"], "inspection");
        assert_eq!(json["record"], "2024 Gauge Install");
    }

    #[test]
    fn test_record_category_parse() {
        assert_eq!(
            "Inspection".parse::<RecordCategory>().unwrap(),
            RecordCategory::Inspection
        );
        assert_eq!(
            "construction".parse::<RecordCategory>().unwrap(),
            RecordCategory::Construction
        );
        assert!("repairs".parse::<RecordCategory>().is_err());
        assert_eq!(RecordCategory::Construction.to_string(), "construction");
    }

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(10);
        assert!(bus.emit(created("x")).is_err());
        bus.emit_lossy(created("x"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(created("2019 Cableway")).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "RecordCreated");
    }

    #[tokio::test]
    async fn test_stream_channel_preserves_order() {
        let (tx, mut rx) = stream_channel();
        for i in 0..5 {
            tx.send(StreamEvent::Chunk {
                correlation_id: "U1".to_string(),
                data: i.to_string(),
            })
            .unwrap();
        }
        for i in 0..5 {
            match rx.recv().await.unwrap() {
                StreamEvent::Chunk { data, .. } => assert_eq!(data, i.to_string()),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
