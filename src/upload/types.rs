//! Upload types for the resumable upload protocol

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::CompletedPart;

// ============================================================================
// Constants
// ============================================================================

/// Content type every chunk body must be sent with
pub const CHUNK_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Request header carrying the declared total length
pub const UPLOAD_LENGTH_HEADER: &str = "upload-length";

/// Request/response header carrying the committed offset
pub const UPLOAD_OFFSET_HEADER: &str = "upload-offset";

/// Event name handed to hook notifiers when an upload completes
pub const UPLOAD_EVENT: &str = "upload";

/// S3 refuses part numbers above this
pub const MAX_PARTS: usize = 10_000;

// ============================================================================
// Session Types
// ============================================================================

/// Backend-specific state carried by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    /// Key reserved by a Begin that has not prepared the backend yet
    Pending,
    /// Byte-range append; the target file itself is the state
    Sequential,
    /// Object storage multipart assembly
    Multipart {
        upload_id: String,
        /// Completed parts in part-number order
        parts: Vec<CompletedPart>,
    },
}

impl BackendHandle {
    pub fn multipart(upload_id: impl Into<String>) -> Self {
        Self::Multipart {
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    /// Completed parts (always empty for sequential uploads)
    pub fn parts(&self) -> &[CompletedPart] {
        match self {
            Self::Pending | Self::Sequential => &[],
            Self::Multipart { parts, .. } => parts,
        }
    }
}

/// Server-side record of one in-progress upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Correlation id for logs
    pub id: Uuid,

    /// Normalized target path; the registry key
    pub path: String,

    /// Total length declared at Begin
    pub declared_length: u64,

    /// Bytes durably committed to the backend
    pub committed_offset: u64,

    pub handle: BackendHandle,

    pub created_at: DateTime<Utc>,

    /// Idle deadline, pushed forward by every touch
    pub expires_at: Instant,
}

impl UploadSession {
    pub fn new(path: String, declared_length: u64, handle: BackendHandle, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            declared_length,
            committed_offset: 0,
            handle,
            created_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Whether every declared byte has been committed
    pub fn is_complete(&self) -> bool {
        self.committed_offset >= self.declared_length
    }

    /// Bytes still expected before the upload completes
    pub fn remaining(&self) -> u64 {
        self.declared_length.saturating_sub(self.committed_offset)
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.declared_length == 0 {
            return 100.0;
        }
        (self.committed_offset as f64 / self.declared_length as f64) * 100.0
    }
}

/// What a backend reports after durably accepting one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// Bytes accepted
    pub written: u64,

    /// The new part, for multipart backends
    pub part: Option<CompletedPart>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Offset mismatch: session is at {expected}, request sent {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::OffsetMismatch { .. } => "OFFSET_MISMATCH",
            Self::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            Self::Unsupported(_) => "NOT_SUPPORTED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Backend(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound(key) => Self::NotFound(key),
            StorageError::AccessDenied(key) => Self::Forbidden(key),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::Forbidden(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}
