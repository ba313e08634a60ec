//! Record note parsing
//!
//! A record may carry a `note.txt` anywhere in its subtree:
//!
//! ```text
//! Inspector: J. Smith
//! Comment: Replaced the orifice line.
//! Second line of the comment.
//! ```
//!
//! A missing or unreadable note yields empty metadata; it is never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::ArchiveBackend;
use crate::snapshot::{ArchiveNode, TraversalLimits};

pub const NOTE_FILE_NAME: &str = "note.txt";

static INSPECTOR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*Inspector:[ \t]*(.*)$").expect("valid inspector regex"));

static COMMENT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*Comment:(?s:(.*))").expect("valid comment regex"));

/// Inspector and comment parsed from a record note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordMetadata {
    pub inspector: String,
    pub comment: String,
}

impl RecordMetadata {
    /// Parse note text; absent labels leave the field empty
    pub fn parse(text: &str) -> Self {
        let inspector = INSPECTOR_LINE
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        let comment = COMMENT_BLOCK
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        Self { inspector, comment }
    }

    pub fn has_inspector(&self) -> bool {
        !self.inspector.is_empty()
    }

    /// Note body written when a record is created
    pub fn note_text(inspector: &str, comment: &str) -> String {
        format!("Inspector: {}\nComment: {}\n", inspector, comment)
    }
}

/// First `note.txt` (case-insensitive) in pre-order
pub fn find_note(record: &ArchiveNode, limits: TraversalLimits) -> Option<&ArchiveNode> {
    record.find_first(limits, |n| {
        n.is_file() && n.name.eq_ignore_ascii_case(NOTE_FILE_NAME)
    })
}

/// Reads record notes through the backend
#[derive(Clone)]
pub struct MetadataReader {
    backend: Arc<dyn ArchiveBackend>,
    limits: TraversalLimits,
}

impl MetadataReader {
    pub fn new(backend: Arc<dyn ArchiveBackend>, limits: TraversalLimits) -> Self {
        Self { backend, limits }
    }

    pub async fn read(&self, record: &ArchiveNode) -> RecordMetadata {
        let Some(note_path) = find_note(record, self.limits).and_then(|n| n.path.clone()) else {
            debug!("No note in {}", record.name);
            return RecordMetadata::default();
        };

        match self.backend.read_text_file(&note_path).await {
            Ok(text) => RecordMetadata::parse(&text),
            Err(e) => {
                warn!("Failed to read {}: {}", note_path.display(), e);
                RecordMetadata::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_full_note() {
        let meta = RecordMetadata::parse(
            "Inspector:  J. Smith \nComment: Replaced orifice line.\n  Flushed well.\n",
        );
        assert_eq!(meta.inspector, "J. Smith");
        assert_eq!(meta.comment, "Replaced orifice line.\n  Flushed well.");
        assert!(meta.has_inspector());
    }

    #[test]
    fn test_labels_are_case_insensitive_and_indentable() {
        let meta = RecordMetadata::parse("  inspector: A\n\tCOMMENT: b");
        assert_eq!(meta.inspector, "A");
        assert_eq!(meta.comment, "b");
    }

    #[test]
    fn test_empty_inspector_does_not_swallow_comment() {
        let meta = RecordMetadata::parse("Inspector:\nComment: only a comment\n");
        assert_eq!(meta.inspector, "");
        assert!(!meta.has_inspector());
        assert_eq!(meta.comment, "only a comment");
    }

    #[test]
    fn test_missing_labels() {
        assert_eq!(RecordMetadata::parse("just text"), RecordMetadata::default());
        assert_eq!(RecordMetadata::parse(""), RecordMetadata::default());
    }

    #[test]
    fn test_note_text_round_trips() {
        let text = RecordMetadata::note_text("A", "b");
        assert_eq!(text, "Inspector: A\nComment: b\n");
        let meta = RecordMetadata::parse(&text);
        assert_eq!(meta.inspector, "A");
        assert_eq!(meta.comment, "b");
    }

    #[test]
    fn test_find_note_case_insensitive_preorder() {
        let mut record = ArchiveNode::folder("2019 Visit", Some(PathBuf::from("/r/2019 Visit")), 0)
            .with_children(vec![
                ArchiveNode::folder("photos", None, 0)
                    .with_children(vec![ArchiveNode::file("NOTE.TXT", None, 0)]),
                ArchiveNode::file("note.txt", None, 0),
            ]);
        record.normalize(TraversalLimits::default());

        let note = find_note(&record, TraversalLimits::default()).unwrap();
        assert_eq!(note.path, Some(PathBuf::from("/r/2019 Visit/photos/NOTE.TXT")));
    }
}
