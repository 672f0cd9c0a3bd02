//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3.

mod s3_client;
mod types;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::StorageError;

pub use s3_client::S3Client;
pub use types::*;

/// Object storage operations needed by the multipart upload backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Object metadata, or `None` when the key does not exist
    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Whether any object lives below `key/`, i.e. the key names a "directory"
    async fn has_children(&self, key: &str) -> Result<bool, StorageError>;

    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError>;

    /// Upload one part and return the backend's content tag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;
}
