//! Backend adapter interface
//!
//! A deployment picks exactly one adapter at startup: sequential append for
//! plain filesystems, part upload for object storage.

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

use super::types::{BackendHandle, ChunkReceipt, UploadError};

/// Chunk body as it arrives from the client
pub type ChunkStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Commit model of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    SequentialAppend,
    PartUpload,
}

/// What the backend currently stores at a target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub is_dir: bool,
    pub size: u64,
}

/// Storage strategy used by the upload coordinator
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Metadata for `path`, or `None` if nothing is stored there
    async fn stat(&self, path: &str) -> Result<Option<TargetInfo>, UploadError>;

    /// Prepare the target for a new upload
    async fn begin_upload(&self, path: &str) -> Result<BackendHandle, UploadError>;

    /// Durably store one chunk starting at `offset`.
    ///
    /// At most `limit` bytes are accepted; a longer body is rejected as a
    /// whole. On any error nothing may count as committed.
    async fn append(
        &self,
        path: &str,
        handle: &BackendHandle,
        offset: u64,
        limit: u64,
        body: ChunkStream,
    ) -> Result<ChunkReceipt, UploadError>;

    /// Turn the committed bytes into the final object
    async fn finalize(&self, path: &str, handle: &BackendHandle) -> Result<(), UploadError>;

    /// Release everything held for an unfinished upload
    async fn abandon(&self, path: &str, handle: &BackendHandle) -> Result<(), UploadError>;
}
