//! Local filesystem backend
//!
//! Implements [`ArchiveBackend`] directly on the host filesystem. Listing
//! follows the scanner conventions used elsewhere in the workspace:
//! sequential walkdir traversal, no symlink following, OS clutter skipped,
//! entries sorted by name.

use archive_common::events::{StreamEvent, StreamEventSender};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{ArchiveBackend, BackendError, OpStatus, UploadFile};
use crate::snapshot::ArchiveNode;

/// Extensions surfaced by listings: photos, reports and notes
const LISTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "pdf", "txt"];

const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", ".git", ".svn"];

/// Smallest chunk that still carries whole base64 quanta
const MIN_CHUNK_SIZE: usize = 4;

/// Filesystem-backed implementation of the storage contract
#[derive(Debug, Clone)]
pub struct LocalBackend {
    chunk_size: usize,
}

impl LocalBackend {
    /// Create a backend that streams files in `chunk_size`-character fragments
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(16_000)
    }
}

fn mtime_seconds(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_listed_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            LISTED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

fn should_process_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let file_name = entry.file_name().to_string_lossy();
    !IGNORED_NAMES.iter().any(|p| file_name == *p)
}

/// Build a node tree from a walkdir pre-order traversal
///
/// A stack holds the chain of open folders; when the walk climbs back up,
/// finished folders are popped and attached to their parent.
fn build_tree(root: &Path, recursive: bool) -> Result<ArchiveNode, BackendError> {
    // a dangling symlink is still an entry
    if std::fs::symlink_metadata(root).is_err() {
        return Err(BackendError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(BackendError::NotADirectory(root.to_path_buf()));
    }

    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stack = vec![ArchiveNode::folder(root_name, Some(root.to_path_buf()), mtime_seconds(root))];

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name()
        .into_iter()
        .filter_entry(should_process_entry);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };

        while stack.len() > entry.depth() {
            attach_top(&mut stack);
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().to_path_buf();
        if entry.file_type().is_dir() {
            let mtime = mtime_seconds(&path);
            stack.push(ArchiveNode::folder(name, Some(path), mtime));
        } else if entry.file_type().is_file() && is_listed_file(&name) {
            let mtime = mtime_seconds(&path);
            if let Some(parent) = stack.last_mut() {
                parent.children.push(ArchiveNode::file(name, Some(path), mtime));
            }
        }
    }

    while stack.len() > 1 {
        attach_top(&mut stack);
    }

    stack
        .pop()
        .ok_or_else(|| BackendError::Task("listing produced no root node".to_string()))
}

fn attach_top(stack: &mut Vec<ArchiveNode>) {
    if let Some(done) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(done);
        }
    }
}

#[async_trait]
impl ArchiveBackend for LocalBackend {
    async fn list_subtree(&self, root: &Path, recursive: bool) -> Result<ArchiveNode, BackendError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || build_tree(&root, recursive))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))?
    }

    async fn begin_stream(
        &self,
        path: &Path,
        correlation_id: &str,
        events: StreamEventSender,
    ) -> Result<(), BackendError> {
        let path = path.to_path_buf();
        let correlation_id = correlation_id.to_string();
        let chunk_size = self.chunk_size;

        tokio::spawn(async move {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("stream read failed for {}: {}", path.display(), e);
                    let _ = events.send(StreamEvent::Failed {
                        correlation_id,
                        message: e.to_string(),
                    });
                    return;
                }
            };

            let encoded = STANDARD.encode(&raw);
            let mut sent = 0usize;
            for fragment in encoded.as_bytes().chunks(chunk_size) {
                let event = StreamEvent::Chunk {
                    correlation_id: correlation_id.clone(),
                    data: String::from_utf8_lossy(fragment).into_owned(),
                };
                if events.send(event).is_err() {
                    debug!("stream receiver gone, abandoning {}", correlation_id);
                    return;
                }
                sent += 1;
            }

            debug!("streamed {} in {} chunks", path.display(), sent);
            let _ = events.send(StreamEvent::Done { correlation_id });
        });

        Ok(())
    }

    async fn read_text_file(&self, path: &Path) -> Result<String, BackendError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::FileAccess(path.to_path_buf(), e.to_string()))
    }

    async fn write_text_file(&self, path: &Path, text: &str) -> Result<OpStatus, BackendError> {
        Ok(match tokio::fs::write(path, text).await {
            Ok(()) => OpStatus::ok(),
            Err(e) => {
                warn!("write_text_file error for {}: {}", path.display(), e);
                OpStatus::failed(e.to_string())
            }
        })
    }

    async fn ensure_directory(&self, path: &Path) -> Result<OpStatus, BackendError> {
        Ok(match tokio::fs::create_dir_all(path).await {
            Ok(()) => OpStatus::ok(),
            Err(e) => {
                warn!("ensure_directory error for {}: {}", path.display(), e);
                OpStatus::failed(e.to_string())
            }
        })
    }

    async fn delete_subtree(&self, path: &Path) -> Result<OpStatus, BackendError> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(_) => return Ok(OpStatus::failed("Path not found")),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        Ok(match result {
            Ok(()) => OpStatus::ok(),
            Err(e) => {
                warn!("delete_subtree error for {}: {}", path.display(), e);
                OpStatus::failed(e.to_string())
            }
        })
    }

    async fn upload_files_base64(
        &self,
        files: &[UploadFile],
        dest_dir: &Path,
    ) -> Result<OpStatus, BackendError> {
        if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
            return Ok(OpStatus::failed(e.to_string()));
        }

        let mut saved = 0usize;
        for file in files {
            let Some(name) = file.stored_name().filter(|_| file.is_uploadable()) else {
                continue;
            };
            let bytes = match STANDARD.decode(file.data.trim()) {
                Ok(bytes) => bytes,
                Err(e) => return Ok(OpStatus::failed(format!("{}: {}", name, e))),
            };
            if let Err(e) = tokio::fs::write(dest_dir.join(name), bytes).await {
                return Ok(OpStatus::failed(format!("{}: {}", name, e)));
            }
            saved += 1;
        }

        debug!("saved {} uploaded files into {}", saved, dest_dir.display());
        Ok(OpStatus::ok())
    }

    async fn upload_file_base64(&self, dest_path: &Path, data: &str) -> Result<OpStatus, BackendError> {
        if let Some(parent) = dest_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(OpStatus::failed(e.to_string()));
            }
        }

        let bytes = match STANDARD.decode(data.trim()) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(OpStatus::failed(e.to_string())),
        };

        Ok(match tokio::fs::write(dest_path, bytes).await {
            Ok(()) => OpStatus::ok(),
            Err(e) => OpStatus::failed(e.to_string()),
        })
    }

    async fn open_natively(&self, path: &Path) -> Result<OpStatus, BackendError> {
        let path: PathBuf = path.to_path_buf();
        let spawned = if cfg!(target_os = "windows") {
            std::process::Command::new("cmd")
                .args(["/C", "start", ""])
                .arg(&path)
                .spawn()
        } else if cfg!(target_os = "macos") {
            std::process::Command::new("open").arg(&path).spawn()
        } else {
            std::process::Command::new("xdg-open").arg(&path).spawn()
        };

        Ok(match spawned {
            Ok(_) => OpStatus::ok(),
            Err(e) => {
                warn!("open_natively error for {}: {}", path.display(), e);
                OpStatus::failed(e.to_string())
            }
        })
    }
}
