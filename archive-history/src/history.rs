//! History Service
//!
//! Composes resolver, snapshot, metadata, classifier, ordering, transport
//! and lifecycle into per-category record listings and the record actions
//! behind them.

use archive_common::config::TomlConfig;
use archive_common::events::{ArchiveEvent, EventBus, RecordCategory};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{ArchiveBackend, BackendError};
use crate::classifier::{classify, find_inspection_report, is_excluded, Classification, ClassificationInput};
use crate::lifecycle::{CreatedRecord, DeleteConfirmation, LifecycleError, RecordDraft, RecordLifecycleManager};
use crate::metadata::{MetadataReader, RecordMetadata};
use crate::ordering::{Chronological, OrderedList, ReorderOutcome};
use crate::path_resolver::{PathResolver, StationContext, StationLocation};
use crate::snapshot::{ArchiveNode, DirectorySnapshot, TraversalLimits};
use crate::sort_key::{derive_sort_key, parse_folder_title};
use crate::streaming::{StreamError, StreamPayload, StreamingTransport};

pub const UNRESOLVED_MESSAGE: &str = "Unable to resolve station folder.";
pub const UNAVAILABLE_MESSAGE: &str = "Could not list photos.";
pub const NO_HISTORY_MESSAGE: &str = "No history found.";

static IMAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(png|jpe?g|gif|bmp|webp)$").expect("valid image regex"));

fn empty_category_message(category: RecordCategory) -> &'static str {
    match category {
        RecordCategory::Inspection => "No inspection history found.",
        RecordCategory::Construction => "No construction history found.",
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Unable to resolve station folder.")]
    Unresolved,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Invalid record name: {0:?}")]
    InvalidRecordName(String),

    #[error("No inspection PDF found in {0}.")]
    NoReport(String),

    #[error("Unable to open PDF: {0}")]
    ReportUnavailable(String),

    #[error("{} is outside the stations root", .0.display())]
    OutsideArchive(PathBuf),
}

/// One record as presented in a listing
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub name: String,
    pub path: PathBuf,
    pub sort_key: u32,
    pub mtime: i64,
    pub classification: Classification,
    pub metadata: RecordMetadata,
    pub date: Option<String>,
    pub title: String,
    pub header: String,
    pub images: Vec<PathBuf>,
    pub report: Option<PathBuf>,
    /// The record's own subtree hit the traversal bounds
    pub truncated: bool,
}

impl Chronological for HistoryRecord {
    fn sort_key(&self) -> u32 {
        self.sort_key
    }

    fn mtime(&self) -> i64 {
        self.mtime
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryListing {
    pub station: String,
    pub category: RecordCategory,
    pub records: Vec<HistoryRecord>,
    /// Whether the order differs from the previous listing of this category
    pub reordered: bool,
}

/// What a category tab shows
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoryView {
    Unresolved { message: String },
    Unavailable { message: String },
    Empty { message: String },
    Records(HistoryListing),
}

impl HistoryView {
    fn unresolved() -> Self {
        HistoryView::Unresolved {
            message: UNRESOLVED_MESSAGE.to_string(),
        }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        match self {
            HistoryView::Records(listing) => &listing.records,
            _ => &[],
        }
    }
}

/// Result of a create: the new paths plus the refreshed listing
#[derive(Debug, Clone, Serialize)]
pub struct RecordCreation {
    pub record: CreatedRecord,
    pub listing: HistoryView,
}

/// Outcome of opening an inspection report
#[derive(Debug)]
pub enum ReportView {
    /// Streamed in-process
    Document(StreamPayload),
    /// Streaming failed; handed to the platform viewer instead
    OpenedNatively { path: PathBuf },
}

/// Tunables taken from the bootstrap config
#[derive(Debug, Clone, Copy)]
pub struct HistorySettings {
    pub limits: TraversalLimits,
    pub max_upload_bytes: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        (&TomlConfig::default()).into()
    }
}

impl From<&TomlConfig> for HistorySettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            limits: config.traversal.into(),
            max_upload_bytes: config.streaming.max_upload_bytes,
        }
    }
}

type RenderKey = (String, RecordCategory);

pub struct HistoryService {
    resolver: PathResolver,
    backend: Arc<dyn ArchiveBackend>,
    snapshot: DirectorySnapshot,
    metadata: MetadataReader,
    transport: StreamingTransport,
    lifecycle: RecordLifecycleManager,
    limits: TraversalLimits,
    events: EventBus,
    rendered: Mutex<HashMap<RenderKey, OrderedList<HistoryRecord>>>,
}

impl HistoryService {
    /// Build the service; starts the transport dispatcher, so a tokio
    /// runtime must be running
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        stations_root: impl Into<PathBuf>,
        settings: HistorySettings,
        events: EventBus,
    ) -> Self {
        let limits = settings.limits;
        let snapshot = DirectorySnapshot::new(backend.clone(), limits);
        let transport = StreamingTransport::new(backend.clone(), settings.max_upload_bytes);
        let lifecycle = RecordLifecycleManager::new(backend.clone(), snapshot.clone(), transport.clone());
        Self {
            resolver: PathResolver::new(stations_root),
            metadata: MetadataReader::new(backend.clone(), limits),
            backend,
            snapshot,
            transport,
            lifecycle,
            limits,
            events,
            rendered: Mutex::new(HashMap::new()),
        }
    }

    pub fn stations_root(&self) -> &Path {
        self.resolver.stations_root()
    }

    pub fn transport(&self) -> &StreamingTransport {
        &self.transport
    }

    pub fn lifecycle(&self) -> &RecordLifecycleManager {
        &self.lifecycle
    }

    pub fn resolve(&self, ctx: &StationContext) -> Result<StationLocation, HistoryError> {
        self.resolver.resolve(ctx).ok_or(HistoryError::Unresolved)
    }

    /// List one record folder with its own traversal budget
    ///
    /// A failed listing falls back to the shallow node from the station
    /// listing, so the record is still shown.
    async fn record_subtree(&self, root: &Path, shallow: &ArchiveNode) -> (ArchiveNode, bool) {
        let path = shallow
            .path
            .clone()
            .unwrap_or_else(|| root.join(&shallow.name));
        match self.snapshot.fetch_reported(&path, true).await {
            Ok((mut tree, report)) => {
                tree.name = shallow.name.clone();
                tree.mtime = shallow.mtime;
                (tree, report.truncated)
            }
            Err(e) => {
                warn!("Listing record {} failed: {}", path.display(), e);
                (shallow.clone(), true)
            }
        }
    }

    async fn build_record(&self, root: &Path, shallow: &ArchiveNode) -> HistoryRecord {
        let (subtree, truncated) = self.record_subtree(root, shallow).await;
        let folder = &subtree;
        let metadata = self.metadata.read(folder).await;
        let classification = classify(&ClassificationInput {
            folder,
            metadata: &metadata,
            limits: self.limits,
        });
        let title = parse_folder_title(&folder.name);
        let header = title.header(&metadata.inspector);

        HistoryRecord {
            name: folder.name.clone(),
            path: folder
                .path
                .clone()
                .unwrap_or_else(|| root.join(&folder.name)),
            sort_key: derive_sort_key(&folder.name),
            mtime: folder.mtime,
            classification,
            images: folder.collect_file_paths(self.limits, |n| IMAGE_NAME.is_match(&n.name)),
            report: find_inspection_report(folder, self.limits),
            metadata,
            date: title.date,
            title: title.title,
            header,
            truncated,
        }
    }

    /// List one category of a station's records, newest first
    pub async fn load(&self, ctx: &StationContext, category: RecordCategory) -> HistoryView {
        let Some(station) = self.resolver.resolve(ctx) else {
            return HistoryView::unresolved();
        };
        debug!(
            "Loading {} history from {}",
            category,
            station.root_path.display()
        );

        // one level only; each record is listed separately below
        let tree = match self.snapshot.fetch(&station.root_path, false).await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("Listing {} failed: {}", station.root_path.display(), e);
                return HistoryView::Unavailable {
                    message: UNAVAILABLE_MESSAGE.to_string(),
                };
            }
        };
        if tree.children.is_empty() {
            return HistoryView::Empty {
                message: NO_HISTORY_MESSAGE.to_string(),
            };
        }

        let folders: Vec<&ArchiveNode> = tree
            .children
            .iter()
            .filter(|c| c.is_folder())
            .filter(|c| {
                let excluded = is_excluded(&c.name);
                if excluded {
                    debug!("Skipping excluded folder {}", c.name);
                }
                !excluded
            })
            .collect();

        let records: Vec<HistoryRecord> = join_all(
            folders
                .iter()
                .map(|folder| self.build_record(&station.root_path, folder)),
        )
        .await
        .into_iter()
        .filter(|r| r.classification.category == category)
        .collect();

        info!(
            "{} {} record(s) for {}",
            records.len(),
            category,
            station.folder_name
        );
        if records.is_empty() {
            return HistoryView::Empty {
                message: empty_category_message(category).to_string(),
            };
        }

        let (records, outcome) = {
            let mut rendered = self.rendered.lock().unwrap_or_else(|e| e.into_inner());
            let list = rendered
                .entry((station.folder_name.clone(), category))
                .or_default();
            let outcome = list.replace(records);
            (list.items().to_vec(), outcome)
        };

        HistoryView::Records(HistoryListing {
            station: station.folder_name,
            category,
            records,
            reordered: outcome == ReorderOutcome::Reordered,
        })
    }

    /// Create a record and return it with the refreshed listing
    pub async fn create_record(
        &self,
        ctx: &StationContext,
        category: RecordCategory,
        draft: &RecordDraft,
    ) -> Result<RecordCreation, HistoryError> {
        let station = self.resolve(ctx)?;
        let record = self.lifecycle.create(&station, draft).await?;

        self.events.emit_lossy(ArchiveEvent::RecordCreated {
            station: station.folder_name.clone(),
            record: record.paths.folder_name.clone(),
            category,
            timestamp: chrono::Utc::now(),
        });

        let listing = self.load(ctx, category).await;
        Ok(RecordCreation { record, listing })
    }

    /// Delete a confirmed record and return the refreshed listing
    pub async fn delete_record(
        &self,
        ctx: &StationContext,
        category: RecordCategory,
        record_name: &str,
        confirmation: &DeleteConfirmation,
    ) -> Result<HistoryView, HistoryError> {
        let station = self.resolve(ctx)?;
        self.lifecycle
            .delete(&station, record_name, confirmation)
            .await?;

        self.events.emit_lossy(ArchiveEvent::RecordDeleted {
            station: station.folder_name.clone(),
            record: record_name.to_string(),
            category,
            timestamp: chrono::Utc::now(),
        });

        Ok(self.load(ctx, category).await)
    }

    /// Stream a record's inspection report, or open it natively
    pub async fn open_report(
        &self,
        ctx: &StationContext,
        record_name: &str,
    ) -> Result<ReportView, HistoryError> {
        let station = self.resolve(ctx)?;
        if !is_plain_name(record_name) {
            return Err(HistoryError::InvalidRecordName(record_name.to_string()));
        }

        let record_path = station.root_path.join(record_name);
        let tree = self.snapshot.fetch(&record_path, true).await?;
        let pdf = find_inspection_report(&tree, self.limits)
            .ok_or_else(|| HistoryError::NoReport(record_name.to_string()))?;

        match self.transport.fetch(&pdf).await {
            Ok(payload) => Ok(ReportView::Document(payload)),
            Err(e) => {
                warn!(
                    "Streaming {} failed, opening natively: {}",
                    pdf.display(),
                    e
                );
                let status = self
                    .backend
                    .open_natively(&pdf)
                    .await
                    .map_err(|e| HistoryError::ReportUnavailable(e.to_string()))?;
                status.into_result().map_err(HistoryError::ReportUnavailable)?;
                Ok(ReportView::OpenedNatively { path: pdf })
            }
        }
    }

    /// Stream any media file under the stations root
    pub async fn fetch_media(&self, path: &Path) -> Result<StreamPayload, HistoryError> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.stations_root().join(path)
        };
        if !is_within(self.stations_root(), &path) {
            return Err(HistoryError::OutsideArchive(path));
        }
        Ok(self.transport.fetch(&path).await?)
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Lexical containment; `..` anywhere is refused
fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && path != root
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_within() {
        let root = Path::new("/srv/Stations");
        assert!(is_within(root, Path::new("/srv/Stations/A/2019/x.jpg")));
        assert!(!is_within(root, Path::new("/srv/Stations")));
        assert!(!is_within(root, Path::new("/srv/Other/x.jpg")));
        assert!(!is_within(root, Path::new("/srv/Stations/../etc/passwd")));
        assert!(!is_within(root, Path::new("/srv/StationsX/a.jpg")));
    }

    #[test]
    fn test_view_serializes_with_status_tag() {
        let json = serde_json::to_value(HistoryView::unresolved()).unwrap();
        assert_eq!(json["status"], "unresolved");
        assert_eq!(json["message"], UNRESOLVED_MESSAGE);

        let json = serde_json::to_value(HistoryView::Records(HistoryListing {
            station: "S".to_string(),
            category: RecordCategory::Inspection,
            records: vec![],
            reordered: false,
        }))
        .unwrap();
        assert_eq!(json["status"], "records");
        assert_eq!(json["category"], "inspection");
    }

    #[test]
    fn test_image_names() {
        assert!(IMAGE_NAME.is_match("a.JPG"));
        assert!(IMAGE_NAME.is_match("b.webp"));
        assert!(!IMAGE_NAME.is_match("report.pdf"));
        assert!(!IMAGE_NAME.is_match("jpg"));
    }
}
