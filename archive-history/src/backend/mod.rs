//! Storage backend contract
//!
//! Every filesystem interaction the archive performs goes through
//! [`ArchiveBackend`]. The archive core never touches the disk directly; it
//! only consumes these call/response contracts, so a remote storage service
//! can stand in for [`LocalBackend`] without changing any archive logic.
//!
//! Two failure layers exist, as in the storage service this mirrors:
//! - `Err(BackendError)`: the call itself could not be made or completed
//! - `Ok(OpStatus { success: false, message })`: the call ran and the
//!   service reported a failure; `message` is shown to users verbatim

mod local;

pub use local::LocalBackend;

use archive_common::events::StreamEventSender;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::snapshot::ArchiveNode;

/// Backend call errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Cannot access file or directory
    #[error("File access error {0}: {1}")]
    FileAccess(PathBuf, String),

    /// Blocking worker failed to complete
    #[error("Backend task failed: {0}")]
    Task(String),
}

/// Response envelope for mutating calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OpStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// Convert into a `Result`, substituting "Unknown error" for a missing message
    pub fn into_result(self) -> Result<(), String> {
        if self.success {
            Ok(())
        } else {
            Err(self.message.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }
}

/// One file of a base64 upload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    /// Destination file name (no directory part)
    pub name: String,
    /// Standard base64 encoding of the file contents
    pub data: String,
}

impl UploadFile {
    /// Encode raw file contents on the client side
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Size of the encoded payload as carried over the wire
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    /// Name the file is stored under: the final path component, if any
    pub fn stored_name(&self) -> Option<&str> {
        Path::new(self.name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
    }

    /// Batch uploads skip entries without a usable name or any data
    pub fn is_uploadable(&self) -> bool {
        self.stored_name().is_some() && !self.data.is_empty()
    }
}

/// Collaborator calls consumed by the archive core
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// Return the node tree rooted at `root`
    ///
    /// With `recursive = false` only the immediate children are listed.
    async fn list_subtree(&self, root: &Path, recursive: bool) -> Result<ArchiveNode, BackendError>;

    /// Start streaming `path` as base64 chunks tagged with `correlation_id`
    ///
    /// Returns once the transfer has been started. Chunk and completion
    /// events arrive later on `events`, strictly ordered for this id.
    async fn begin_stream(
        &self,
        path: &Path,
        correlation_id: &str,
        events: StreamEventSender,
    ) -> Result<(), BackendError>;

    async fn read_text_file(&self, path: &Path) -> Result<String, BackendError>;

    async fn write_text_file(&self, path: &Path, text: &str) -> Result<OpStatus, BackendError>;

    async fn ensure_directory(&self, path: &Path) -> Result<OpStatus, BackendError>;

    /// Recursively delete a directory, or delete a single file
    async fn delete_subtree(&self, path: &Path) -> Result<OpStatus, BackendError>;

    async fn upload_files_base64(
        &self,
        files: &[UploadFile],
        dest_dir: &Path,
    ) -> Result<OpStatus, BackendError>;

    async fn upload_file_base64(&self, dest_path: &Path, data: &str) -> Result<OpStatus, BackendError>;

    /// Hand `path` to the platform's default viewer
    async fn open_natively(&self, path: &Path) -> Result<OpStatus, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_status_into_result() {
        assert_eq!(OpStatus::ok().into_result(), Ok(()));
        assert_eq!(
            OpStatus::failed("Path not found").into_result(),
            Err("Path not found".to_string())
        );
        let bare = OpStatus {
            success: false,
            message: None,
        };
        assert_eq!(bare.into_result(), Err("Unknown error".to_string()));
    }

    #[test]
    fn test_op_status_wire_shape() {
        let json = serde_json::to_value(OpStatus::ok()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));

        let parsed: OpStatus = serde_json::from_str(r#"{"success": false, "message": "denied"}"#).unwrap();
        assert_eq!(parsed, OpStatus::failed("denied"));
    }

    #[test]
    fn test_upload_file_stored_name() {
        let file = |name: &str| UploadFile {
            name: name.to_string(),
            data: "QQ==".to_string(),
        };
        assert_eq!(file("a.jpg").stored_name(), Some("a.jpg"));
        assert_eq!(file("../../etc/passwd").stored_name(), Some("passwd"));
        assert_eq!(file("   ").stored_name(), None);
        assert!(!file("   ").is_uploadable());
        assert!(!UploadFile::from_bytes("empty.jpg", b"").is_uploadable());
        assert!(UploadFile::from_bytes("a.jpg", b"A").is_uploadable());
    }

    #[test]
    fn test_upload_file_encodes_client_side() {
        let file = UploadFile::from_bytes("a.jpg", b"AB");
        assert_eq!(file.data, "QUI=");
        assert_eq!(file.encoded_len(), 4);
    }
}
