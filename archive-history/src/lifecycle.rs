//! Record creation and deletion
//!
//! Creation runs five ordered steps. Every step that leaves something
//! behind records a compensating action; when a later step fails the
//! recorded actions run in reverse. A record folder that existed before
//! the create call is never removed by compensation.
//!
//! Deletion requires a [`DeleteConfirmation`] naming the record and issues
//! a single `delete-subtree` call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{ArchiveBackend, BackendError, OpStatus, UploadFile};
use crate::metadata::{RecordMetadata, NOTE_FILE_NAME};
use crate::path_resolver::{to_fs_safe, StationLocation};
use crate::snapshot::DirectorySnapshot;
use crate::streaming::{StreamError, StreamingTransport};

pub const PHOTOS_DIR_NAME: &str = "photos";
pub const REPORT_FILE_NAME: &str = "inspection_report.pdf";

/// User input for a new record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordDraft {
    pub year: String,
    pub name: String,
    #[serde(default)]
    pub inspector: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub photos: Vec<UploadFile>,
    /// Stored as `inspection_report.pdf` whatever its name
    #[serde(default)]
    pub report: Option<UploadFile>,
}

/// Paths a new record will occupy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordPaths {
    pub folder_name: String,
    pub dest_folder: PathBuf,
    pub photos_dir: PathBuf,
    pub note_path: PathBuf,
    pub report_path: PathBuf,
}

impl RecordPaths {
    /// Validate `year`/`name` and derive the record layout under `root`
    pub fn plan(root: &Path, year: &str, name: &str) -> Result<Self, LifecycleError> {
        let year = year.trim();
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LifecycleError::InvalidYear);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::MissingName);
        }

        let display = format!("{} {}", year, name);
        let folder_name = to_fs_safe(&display);
        if folder_name == "." || folder_name == ".." || folder_name.is_empty() {
            return Err(LifecycleError::UnusableName(display));
        }

        let dest_folder = root.join(&folder_name);
        Ok(Self {
            photos_dir: dest_folder.join(PHOTOS_DIR_NAME),
            note_path: dest_folder.join(NOTE_FILE_NAME),
            report_path: dest_folder.join(REPORT_FILE_NAME),
            dest_folder,
            folder_name,
        })
    }
}

/// Ordered creation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStep {
    EnsureRecordDirectory,
    EnsurePhotosDirectory,
    WriteNote,
    UploadPhotos,
    UploadReport,
}

impl fmt::Display for CreateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CreateStep::EnsureRecordDirectory => "create the record folder",
            CreateStep::EnsurePhotosDirectory => "create the photos folder",
            CreateStep::WriteNote => "write the note",
            CreateStep::UploadPhotos => "upload photos",
            CreateStep::UploadReport => "upload the inspection report",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Nothing had been left behind
    NotNeeded,
    Completed,
    /// At least one compensating action failed; partial state remains on disk
    Incomplete,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Please enter a 4-digit Year.")]
    InvalidYear,

    #[error("Please enter a Name.")]
    MissingName,

    #[error("Record name {0:?} has no usable characters")]
    UnusableName(String),

    #[error("Failed to {step}: {message}")]
    StepFailed {
        step: CreateStep,
        message: String,
        rollback: RollbackOutcome,
    },

    #[error("Deletion of {record:?} was not confirmed")]
    NotConfirmed { record: String },

    #[error("Invalid record name: {0:?}")]
    InvalidRecordName(String),

    /// Backend message, verbatim
    #[error("{0}")]
    DeleteFailed(String),
}

/// Explicit consent to delete one record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteConfirmation {
    pub record: String,
}

impl DeleteConfirmation {
    pub fn for_record(record: impl Into<String>) -> Self {
        Self {
            record: record.into(),
        }
    }
}

/// Paths and upload counts of a created record
#[derive(Debug, Clone, Serialize)]
pub struct CreatedRecord {
    #[serde(flatten)]
    pub paths: RecordPaths,
    pub photos_uploaded: usize,
    pub report_uploaded: bool,
    /// The record folder already existed and was reused
    pub reused_folder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompensatingAction {
    RemoveDirectory(PathBuf),
}

impl CompensatingAction {
    async fn run(&self, backend: &dyn ArchiveBackend) -> Result<(), String> {
        match self {
            CompensatingAction::RemoveDirectory(path) => {
                info!("Rolling back: removing {}", path.display());
                op_result(backend.delete_subtree(path).await)
            }
        }
    }
}

fn op_result(result: Result<OpStatus, BackendError>) -> Result<(), String> {
    match result {
        Ok(status) => status.into_result(),
        Err(e) => Err(e.to_string()),
    }
}

fn upload_result(result: Result<OpStatus, StreamError>) -> Result<(), String> {
    match result {
        Ok(status) => status.into_result(),
        Err(e) => Err(e.to_string()),
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Creates and deletes records through the backend
#[derive(Clone)]
pub struct RecordLifecycleManager {
    backend: Arc<dyn ArchiveBackend>,
    snapshot: DirectorySnapshot,
    transport: StreamingTransport,
}

impl RecordLifecycleManager {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        snapshot: DirectorySnapshot,
        transport: StreamingTransport,
    ) -> Self {
        Self {
            backend,
            snapshot,
            transport,
        }
    }

    /// Whether anything already occupies `dest`
    ///
    /// The destination itself is listed, so entries a parent listing would
    /// hide (symlinks, case-folded names) still count. Only a definite
    /// "not found" counts as absent.
    async fn destination_exists(&self, dest: &Path) -> bool {
        match self.snapshot.fetch(dest, false).await {
            Ok(_) => true,
            Err(BackendError::PathNotFound(_)) => false,
            Err(e) => {
                warn!("Could not check for existing {}: {}", dest.display(), e);
                true
            }
        }
    }

    async fn rollback(&self, actions: &[CompensatingAction]) -> RollbackOutcome {
        if actions.is_empty() {
            return RollbackOutcome::NotNeeded;
        }
        let mut outcome = RollbackOutcome::Completed;
        for action in actions.iter().rev() {
            if let Err(message) = action.run(self.backend.as_ref()).await {
                warn!("Rollback step {:?} failed: {}", action, message);
                outcome = RollbackOutcome::Incomplete;
            }
        }
        outcome
    }

    async fn fail(
        &self,
        step: CreateStep,
        message: String,
        actions: &[CompensatingAction],
    ) -> LifecycleError {
        warn!("Record creation failed to {}: {}", step, message);
        let rollback = self.rollback(actions).await;
        LifecycleError::StepFailed {
            step,
            message,
            rollback,
        }
    }

    pub async fn create(
        &self,
        station: &StationLocation,
        draft: &RecordDraft,
    ) -> Result<CreatedRecord, LifecycleError> {
        let paths = RecordPaths::plan(&station.root_path, &draft.year, &draft.name)?;
        info!(
            "Creating record {} for station {}",
            paths.folder_name, station.folder_name
        );

        let reused_folder = self.destination_exists(&paths.dest_folder).await;
        let mut actions: Vec<CompensatingAction> = Vec::new();

        let step = CreateStep::EnsureRecordDirectory;
        if let Err(message) = op_result(self.backend.ensure_directory(&paths.dest_folder).await) {
            return Err(self.fail(step, message, &actions).await);
        }
        if !reused_folder {
            actions.push(CompensatingAction::RemoveDirectory(paths.dest_folder.clone()));
        }

        let step = CreateStep::EnsurePhotosDirectory;
        if let Err(message) = op_result(self.backend.ensure_directory(&paths.photos_dir).await) {
            return Err(self.fail(step, message, &actions).await);
        }

        let step = CreateStep::WriteNote;
        let note = RecordMetadata::note_text(draft.inspector.trim(), draft.comment.trim());
        if let Err(message) = op_result(self.backend.write_text_file(&paths.note_path, &note).await) {
            return Err(self.fail(step, message, &actions).await);
        }

        let step = CreateStep::UploadPhotos;
        if !draft.photos.is_empty() {
            let result = self
                .transport
                .upload_files(&draft.photos, &paths.photos_dir)
                .await;
            if let Err(message) = upload_result(result) {
                return Err(self.fail(step, message, &actions).await);
            }
        }

        let step = CreateStep::UploadReport;
        let report_uploaded = match draft.report.as_ref().filter(|r| !r.data.is_empty()) {
            Some(report) => {
                let result = self.transport.upload_file(&paths.report_path, report).await;
                if let Err(message) = upload_result(result) {
                    return Err(self.fail(step, message, &actions).await);
                }
                true
            }
            None => false,
        };

        info!("Created record {}", paths.dest_folder.display());
        Ok(CreatedRecord {
            photos_uploaded: draft.photos.iter().filter(|p| p.is_uploadable()).count(),
            paths,
            report_uploaded,
            reused_folder,
        })
    }

    /// Delete `root/record_name` after checking the confirmation
    pub async fn delete(
        &self,
        station: &StationLocation,
        record_name: &str,
        confirmation: &DeleteConfirmation,
    ) -> Result<PathBuf, LifecycleError> {
        if confirmation.record != record_name {
            return Err(LifecycleError::NotConfirmed {
                record: record_name.to_string(),
            });
        }
        if !is_plain_name(record_name) {
            return Err(LifecycleError::InvalidRecordName(record_name.to_string()));
        }

        let target = station.root_path.join(record_name);
        info!("Deleting record {}", target.display());
        op_result(self.backend.delete_subtree(&target).await).map_err(LifecycleError::DeleteFailed)?;
        debug!("Deleted {}", target.display());
        Ok(target)
    }
}

/// Add-record form states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    FormOpen { error: Option<String> },
    Submitting,
}

impl WorkflowState {
    fn label(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::FormOpen { .. } => "form_open",
            WorkflowState::Submitting => "submitting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {action} while {state}")]
pub struct TransitionError {
    pub action: &'static str,
    pub state: &'static str,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// `Idle -> FormOpen -> Submitting -> Idle | FormOpen(error)`
#[derive(Debug, Clone)]
pub struct AddRecordWorkflow {
    state: WorkflowState,
}

impl Default for AddRecordWorkflow {
    fn default() -> Self {
        Self {
            state: WorkflowState::Idle,
        }
    }
}

impl AddRecordWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        TransitionError {
            action,
            state: self.state.label(),
        }
    }

    pub fn open(&mut self) -> Result<(), TransitionError> {
        match self.state {
            WorkflowState::Idle => {
                self.state = WorkflowState::FormOpen { error: None };
                Ok(())
            }
            _ => Err(self.reject("open the form")),
        }
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        match self.state {
            WorkflowState::FormOpen { .. } => {
                self.state = WorkflowState::Idle;
                Ok(())
            }
            _ => Err(self.reject("cancel")),
        }
    }

    pub fn can_submit(&self) -> bool {
        matches!(self.state, WorkflowState::FormOpen { .. })
    }

    pub fn submit_label(&self) -> &'static str {
        match self.state {
            WorkflowState::Submitting => "Creating…",
            _ => "Create",
        }
    }

    pub fn begin_submit(&mut self) -> Result<(), TransitionError> {
        if !self.can_submit() {
            return Err(self.reject("submit"));
        }
        self.state = WorkflowState::Submitting;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        match self.state {
            WorkflowState::Submitting => {
                self.state = WorkflowState::Idle;
                Ok(())
            }
            _ => Err(self.reject("complete")),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        match self.state {
            WorkflowState::Submitting => {
                self.state = WorkflowState::FormOpen {
                    error: Some(message.into()),
                };
                Ok(())
            }
            _ => Err(self.reject("fail")),
        }
    }

    /// Run a create through `manager`, driving the state machine around it
    pub async fn submit(
        &mut self,
        manager: &RecordLifecycleManager,
        station: &StationLocation,
        draft: &RecordDraft,
    ) -> Result<CreatedRecord, WorkflowError> {
        self.begin_submit()?;
        match manager.create(station, draft).await {
            Ok(created) => {
                self.succeed()?;
                Ok(created)
            }
            Err(e) => {
                self.fail(e.to_string())?;
                Err(e.into())
            }
        }
    }
}
