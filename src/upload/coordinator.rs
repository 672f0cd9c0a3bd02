//! Upload coordinator
//!
//! Runs the Begin / Status / AppendChunk / Abandon state machine on top of
//! the session registry and the configured backend. A session goes
//! `NoSession -> Active -> (Completed | Aborted)`; both terminal states drop
//! the registry row, so the key reads as `NoSession` again afterwards.

use std::sync::Arc;
use std::time::Duration;

use crate::access::{AccessChecker, Action};
use crate::hooks::{HookEvent, HookNotifier};

use super::backend::{ChunkStream, UploadBackend};
use super::keepalive::KeepAliveGuard;
use super::registry::SessionRegistry;
use super::types::{BackendHandle, UploadError, UploadSession, CHUNK_CONTENT_TYPE, UPLOAD_EVENT};

/// Offset report returned by [`UploadCoordinator::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    pub offset: u64,
    pub length: u64,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    registry: SessionRegistry,
    backend: Arc<dyn UploadBackend>,
    checker: Arc<dyn AccessChecker>,
    hooks: Arc<dyn HookNotifier>,
    keepalive_interval: Duration,
}

impl UploadCoordinator {
    pub fn new(
        registry: SessionRegistry,
        backend: Arc<dyn UploadBackend>,
        checker: Arc<dyn AccessChecker>,
        hooks: Arc<dyn HookNotifier>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                backend,
                checker,
                hooks,
                keepalive_interval,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn backend(&self) -> &Arc<dyn UploadBackend> {
        &self.inner.backend
    }

    fn require(&self, action: Action, path: &str) -> Result<(), UploadError> {
        if self.inner.checker.allows(action, path) {
            Ok(())
        } else {
            Err(UploadError::Forbidden(path.to_string()))
        }
    }

    // ========================================================================
    // Begin
    // ========================================================================

    /// Open a new upload session for `raw_path`
    pub async fn begin(
        &self,
        raw_path: &str,
        upload_length: Option<&str>,
        overwrite: bool,
    ) -> Result<UploadSession, UploadError> {
        let path = normalize_path(raw_path)?;
        self.require(Action::Create, &path)?;
        let declared_length = parse_header(upload_length, "Upload-Length")?;

        if let Some(target) = self.inner.backend.stat(&path).await? {
            if target.is_dir {
                return Err(UploadError::Validation(format!(
                    "cannot upload to a directory {}",
                    path
                )));
            }
            // Existing objects stay untouched unless explicitly overridden
            if !overwrite {
                return Err(UploadError::Conflict(format!("{} already exists", path)));
            }
            self.require(Action::Modify, &path)?;
        }

        // Claim the key before the backend is touched; a racing Begin gets a
        // conflict instead of truncating the winner's target.
        let (reserved, _writer) = self.inner.registry.reserve(&path, declared_length).await?;

        let handle = match self.inner.backend.begin_upload(&path).await {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.registry.delete(&path).await;
                return Err(e);
            }
        };

        match self.inner.registry.activate(&path, reserved.id, handle.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(abandon_err) = self.inner.backend.abandon(&path, &handle).await {
                    tracing::warn!(
                        session_id = %reserved.id,
                        path = %path,
                        error = %abandon_err,
                        "Failed to release backend state of a lost reservation"
                    );
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Report committed and declared length of an active upload
    pub async fn status(&self, raw_path: &str) -> Result<UploadStatus, UploadError> {
        let path = normalize_path(raw_path)?;
        self.require(Action::Create, &path)?;

        let session = self.inner.registry.get(&path).await?;
        self.inner.registry.touch(&path).await;

        Ok(UploadStatus {
            offset: session.committed_offset,
            length: session.declared_length,
        })
    }

    // ========================================================================
    // AppendChunk
    // ========================================================================

    /// Append one chunk and return the new committed offset
    pub async fn append_chunk(
        &self,
        raw_path: &str,
        content_type: Option<&str>,
        upload_offset: Option<&str>,
        body: ChunkStream,
    ) -> Result<u64, UploadError> {
        let path = normalize_path(raw_path)?;
        self.require(Action::Create, &path)?;

        if content_type != Some(CHUNK_CONTENT_TYPE) {
            return Err(UploadError::UnsupportedMediaType(
                content_type.unwrap_or("none").to_string(),
            ));
        }
        let offset = parse_header(upload_offset, "Upload-Offset")?;

        let _writer = self.inner.registry.acquire_writer(&path).await?;
        let session = self.inner.registry.get(&path).await?;

        if session.handle == BackendHandle::Pending {
            return Err(UploadError::Conflict(format!(
                "upload for {} was never prepared",
                path
            )));
        }
        if session.committed_offset != offset {
            return Err(UploadError::OffsetMismatch {
                expected: session.committed_offset,
                actual: offset,
            });
        }

        // Prevent the session from being evicted during the transfer
        let _keepalive = KeepAliveGuard::start(
            self.inner.registry.clone(),
            path.clone(),
            self.inner.keepalive_interval,
        );
        self.inner.registry.touch(&path).await;

        let receipt = self
            .inner
            .backend
            .append(&path, &session.handle, offset, session.remaining(), body)
            .await
            .map_err(|e| {
                tracing::warn!(
                    session_id = %session.id,
                    path = %path,
                    offset = offset,
                    error = %e,
                    "Chunk rejected"
                );
                e
            })?;

        let session = self.inner.registry.commit(&path, session.id, offset, receipt).await?;

        tracing::debug!(
            session_id = %session.id,
            path = %path,
            committed_offset = session.committed_offset,
            declared_length = session.declared_length,
            progress = format!("{:.1}%", session.progress()),
            "Chunk committed"
        );

        if session.is_complete() {
            self.complete(&session).await?;
        }

        Ok(session.committed_offset)
    }

    async fn complete(&self, session: &UploadSession) -> Result<(), UploadError> {
        // On failure the session stays at its full offset; an empty chunk at
        // that offset retries finalization.
        self.inner
            .backend
            .finalize(&session.path, &session.handle)
            .await?;

        self.inner.registry.delete(&session.path).await;

        tracing::info!(
            session_id = %session.id,
            path = %session.path,
            size = session.committed_offset,
            "Upload completed"
        );

        self.inner.hooks.notify(HookEvent {
            name: UPLOAD_EVENT,
            path: session.path.clone(),
            size: session.committed_offset,
        });

        Ok(())
    }

    // ========================================================================
    // Abandon
    // ========================================================================

    /// Cancel an active upload and release its backend state
    pub async fn abandon(&self, raw_path: &str) -> Result<(), UploadError> {
        let path = normalize_path(raw_path)?;
        if path == "/" {
            return Err(UploadError::Forbidden(path));
        }
        self.require(Action::Create, &path)?;

        // An in-flight append or Begin owns the key until it returns
        let _writer = self.inner.registry.acquire_writer(&path).await?;
        let session = self.inner.registry.get(&path).await?;

        if let Err(e) = self.inner.backend.abandon(&path, &session.handle).await {
            tracing::warn!(
                session_id = %session.id,
                path = %path,
                error = %e,
                "Failed to clean up abandoned upload"
            );
        }

        self.inner.registry.delete(&path).await;

        tracing::info!(
            session_id = %session.id,
            path = %path,
            committed_offset = session.committed_offset,
            "Upload abandoned"
        );

        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Canonical registry key for a request path: `/`-rooted, no empty, `.` or
/// `..` segments. A trailing slash names a directory and is rejected.
pub fn normalize_path(raw: &str) -> Result<String, UploadError> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(UploadError::Validation(format!(
                    "path may not contain '..': {}",
                    raw
                )))
            }
            s if s.chars().any(char::is_control) => {
                return Err(UploadError::Validation(format!("invalid path: {:?}", raw)))
            }
            s => segments.push(s),
        }
    }

    if !segments.is_empty() && raw.ends_with('/') {
        return Err(UploadError::Validation(format!(
            "cannot upload to a directory {}",
            raw
        )));
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Parse a non-negative decimal header value
fn parse_header(value: Option<&str>, name: &str) -> Result<u64, UploadError> {
    let value = value.ok_or_else(|| UploadError::Validation(format!("missing {} header", name)))?;
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UploadError::Validation(format!("invalid {}: {}", name, value)));
    }
    trimmed
        .parse()
        .map_err(|_| UploadError::Validation(format!("invalid {}: {}", name, value)))
}

// ============================================================================
// Tests
// ============================================================================
