//! Chunked media transport
//!
//! # Download
//!
//! ```text
//! download(path) -> register(id) -> begin_stream(path, id)
//!                                         |
//!        backend: Chunk(id, b64)* then Done(id) | Failed(id, msg)
//!                                         |
//!                dispatcher -> SessionRegistry::apply(event)
//!                                         |
//!                 Done: concatenate, decode, deliver to the sink
//! ```
//!
//! Every session is keyed by its correlation id and owns its own chunk list,
//! so events for different ids may interleave freely. Sessions leave the
//! registry on done, failure, cancellation, handle drop or idle timeout.
//!
//! # Upload
//!
//! Uploads are single-shot base64 calls. Payloads over the configured
//! message limit are refused before the backend is called.

use archive_common::correlation;
use archive_common::events::{stream_channel, StreamEvent, StreamEventReceiver, StreamEventSender};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::{ArchiveBackend, OpStatus, UploadFile};

/// Decoder for one padded segment, or an unpadded final segment
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Transport errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer timed out waiting for the backend")]
    TimedOut,

    #[error("Transfer {correlation_id} failed: {message}")]
    Failed {
        correlation_id: String,
        message: String,
    },

    #[error("Transfer {correlation_id} could not be decoded: {message}")]
    Decode {
        correlation_id: String,
        message: String,
    },

    /// The session vanished without a result
    #[error("Transfer abandoned")]
    Abandoned,

    #[error("Payload of {encoded_len} bytes exceeds the {limit} byte message limit")]
    PayloadTooLarge { encoded_len: usize, limit: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// How a payload is meant to be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    pub fn for_path(path: &Path) -> Self {
        if mime_for_path(path) == "application/pdf" {
            MediaKind::Document
        } else {
            MediaKind::Image
        }
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// A reassembled transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPayload {
    pub correlation_id: String,
    pub media: MediaKind,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl StreamPayload {
    /// `data:<mime>;base64,...` form for inline presentation
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// Decode base64 produced by concatenating independently padded fragments
///
/// The text is split after every 4-character quantum that carries padding
/// and each segment is decoded separately. For a stream padded only at its
/// end this is the same as decoding the whole string.
pub fn decode_concatenated(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let bytes = data.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    let mut start = 0;

    for (i, quantum) in bytes.chunks(4).enumerate() {
        if quantum.contains(&b'=') {
            let end = i * 4 + quantum.len();
            out.extend(SEGMENT_ENGINE.decode(&bytes[start..end])?);
            start = end;
        }
    }
    if start < bytes.len() {
        out.extend(SEGMENT_ENGINE.decode(&bytes[start..])?);
    }
    Ok(out)
}

type SessionResult = Result<StreamPayload, StreamError>;

struct StreamSession {
    chunks: Vec<String>,
    sink: oneshot::Sender<SessionResult>,
    media: MediaKind,
    mime: String,
    started_at: Instant,
    last_activity: Instant,
}

/// Concurrency-safe table of in-flight downloads
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, StreamSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamSession>> {
        // a panicked holder cannot leave a session half-written
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a session; the receiver resolves when it completes or is evicted
    pub fn register(
        &self,
        correlation_id: &str,
        media: MediaKind,
        mime: &str,
    ) -> oneshot::Receiver<SessionResult> {
        let (sink, receiver) = oneshot::channel();
        let now = Instant::now();
        let session = StreamSession {
            chunks: Vec::new(),
            sink,
            media,
            mime: mime.to_string(),
            started_at: now,
            last_activity: now,
        };
        if self.lock().insert(correlation_id.to_string(), session).is_some() {
            warn!("Correlation id {} reused; previous session dropped", correlation_id);
        }
        receiver
    }

    /// Apply one inbound protocol event
    pub fn apply(&self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk {
                correlation_id,
                data,
            } => {
                let mut sessions = self.lock();
                match sessions.get_mut(&correlation_id) {
                    Some(session) => {
                        session.chunks.push(data);
                        session.last_activity = Instant::now();
                    }
                    None => debug!("Dropping chunk for unknown session {}", correlation_id),
                }
            }
            StreamEvent::Done { correlation_id } => {
                let Some(session) = self.lock().remove(&correlation_id) else {
                    debug!("Dropping done for unknown session {}", correlation_id);
                    return;
                };
                complete(correlation_id, session);
            }
            StreamEvent::Failed {
                correlation_id,
                message,
            } => {
                let Some(session) = self.lock().remove(&correlation_id) else {
                    debug!("Dropping failure for unknown session {}", correlation_id);
                    return;
                };
                warn!("Transfer {} failed: {}", correlation_id, message);
                let _ = session.sink.send(Err(StreamError::Failed {
                    correlation_id,
                    message,
                }));
            }
        }
    }

    /// Remove a session and fail its sink with `reason`
    pub fn evict(&self, correlation_id: &str, reason: StreamError) -> bool {
        match self.lock().remove(correlation_id) {
            Some(session) => {
                debug!("Evicting session {}: {}", correlation_id, reason);
                let _ = session.sink.send(Err(reason));
                true
            }
            None => false,
        }
    }

    /// Remove a session whose receiver is gone
    pub fn discard(&self, correlation_id: &str) -> bool {
        self.lock().remove(correlation_id).is_some()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evict every session idle for longer than `idle`
    pub fn reap_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, StreamSession)> = {
            let mut sessions = self.lock();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| now.saturating_duration_since(s.last_activity) > idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        for (id, session) in &expired {
            warn!(
                "Reaping idle transfer {} after {:?} ({} chunks)",
                id,
                now.saturating_duration_since(session.started_at),
                session.chunks.len()
            );
        }
        let count = expired.len();
        for (_, session) in expired {
            let _ = session.sink.send(Err(StreamError::TimedOut));
        }
        count
    }
}

/// Decode a finished session outside the registry lock and resolve its sink
fn complete(correlation_id: String, session: StreamSession) {
    let StreamSession {
        chunks,
        sink,
        media,
        mime,
        started_at,
        ..
    } = session;

    let result = match decode_concatenated(&chunks.concat()) {
        Ok(bytes) => {
            debug!(
                "Transfer {} complete: {} chunks, {} bytes in {:?}",
                correlation_id,
                chunks.len(),
                bytes.len(),
                started_at.elapsed()
            );
            Ok(StreamPayload {
                correlation_id,
                media,
                mime,
                bytes,
            })
        }
        Err(e) => {
            warn!("Transfer {} decode failed: {}", correlation_id, e);
            Err(StreamError::Decode {
                correlation_id,
                message: e.to_string(),
            })
        }
    };
    let _ = sink.send(result);
}

/// Apply every inbound event to `registry` until the channel closes
pub fn spawn_dispatcher(registry: SessionRegistry, mut events: StreamEventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            trace!("stream event for {}", event.correlation_id());
            registry.apply(event);
        }
        debug!("Stream event channel closed; dispatcher exiting");
    })
}

/// Periodically evict idle sessions until `shutdown` is cancelled
pub fn spawn_reaper(
    registry: SessionRegistry,
    idle: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = registry.reap_idle(idle);
                    if reaped > 0 {
                        info!("Reaped {} idle transfer(s)", reaped);
                    }
                }
            }
        }
    })
}

/// Handle to one in-flight download
///
/// Cancelling the token (from here or a cloned handle) or dropping the
/// handle evicts the session.
pub struct Download {
    correlation_id: String,
    receiver: oneshot::Receiver<SessionResult>,
    cancel: CancellationToken,
    registry: SessionRegistry,
}

impl Download {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.registry.evict(&self.correlation_id, StreamError::Cancelled);
    }

    /// Wait for the payload
    pub async fn finish(mut self) -> Result<StreamPayload, StreamError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            result = &mut self.receiver => match result {
                Ok(result) => result,
                Err(_) => Err(StreamError::Abandoned),
            },
            _ = cancel.cancelled() => {
                self.registry.evict(&self.correlation_id, StreamError::Cancelled);
                Err(StreamError::Cancelled)
            }
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if self.registry.discard(&self.correlation_id) {
            debug!("Download {} dropped before completion", self.correlation_id);
        }
        self.cancel.cancel();
    }
}

/// Download and upload entry point over a backend
#[derive(Clone)]
pub struct StreamingTransport {
    backend: Arc<dyn ArchiveBackend>,
    registry: SessionRegistry,
    events: StreamEventSender,
    max_upload_bytes: usize,
}

impl StreamingTransport {
    /// Create the transport and start its dispatcher (requires a tokio runtime)
    pub fn new(backend: Arc<dyn ArchiveBackend>, max_upload_bytes: usize) -> Self {
        let registry = SessionRegistry::new();
        let (events, receiver) = stream_channel();
        spawn_dispatcher(registry.clone(), receiver);
        Self {
            backend,
            registry,
            events,
            max_upload_bytes,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Sender backends deliver protocol events on
    pub fn events_sender(&self) -> StreamEventSender {
        self.events.clone()
    }

    pub fn spawn_reaper(
        &self,
        idle: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        spawn_reaper(self.registry.clone(), idle, interval, shutdown)
    }

    /// Start streaming `path`
    pub async fn download(&self, path: &Path) -> Result<Download, StreamError> {
        let correlation_id = correlation::generate();
        let media = MediaKind::for_path(path);
        let receiver = self
            .registry
            .register(&correlation_id, media, mime_for_path(path));

        let cancel = CancellationToken::new();
        {
            let registry = self.registry.clone();
            let token = cancel.clone();
            let id = correlation_id.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                registry.evict(&id, StreamError::Cancelled);
            });
        }

        let download = Download {
            correlation_id,
            receiver,
            cancel,
            registry: self.registry.clone(),
        };

        debug!("Starting transfer {} for {}", download.correlation_id, path.display());
        self.backend
            .begin_stream(path, &download.correlation_id, self.events.clone())
            .await
            .map_err(|e| StreamError::Backend(e.to_string()))?;
        Ok(download)
    }

    /// Download `path` and wait for the payload
    pub async fn fetch(&self, path: &Path) -> Result<StreamPayload, StreamError> {
        self.download(path).await?.finish().await
    }

    fn check_size(&self, encoded_len: usize) -> Result<(), StreamError> {
        if encoded_len > self.max_upload_bytes {
            return Err(StreamError::PayloadTooLarge {
                encoded_len,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Upload a batch of files into `dest_dir` in one call
    pub async fn upload_files(
        &self,
        files: &[UploadFile],
        dest_dir: &Path,
    ) -> Result<OpStatus, StreamError> {
        self.check_size(files.iter().map(UploadFile::encoded_len).sum())?;
        self.backend
            .upload_files_base64(files, dest_dir)
            .await
            .map_err(|e| StreamError::Backend(e.to_string()))
    }

    /// Upload one file to `dest_path`, whatever its original name
    pub async fn upload_file(&self, dest_path: &Path, file: &UploadFile) -> Result<OpStatus, StreamError> {
        self.check_size(file.encoded_len())?;
        self.backend
            .upload_file_base64(dest_path, &file.data)
            .await
            .map_err(|e| StreamError::Backend(e.to_string()))
    }
}
