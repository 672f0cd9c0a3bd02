//! Part-upload backend
//!
//! Maps every chunk onto exactly one multipart-upload part. There are no
//! partial acknowledgements: a part either lands whole or contributes
//! nothing.
//!
//! Object stores reject parts below a minimum size (5 MiB on S3) for all but
//! the last part. That is left to the client's chunk sizing; undersized
//! intermediate chunks surface as a storage error at completion time.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::StreamExt;

use crate::storage::{CompletedPart, ObjectStore};

use super::backend::{BackendKind, ChunkStream, TargetInfo, UploadBackend};
use super::types::{BackendHandle, ChunkReceipt, UploadError, MAX_PARTS};

/// Multipart upload backend over an object store
pub struct MultipartBackend {
    store: Arc<dyn ObjectStore>,
    /// Largest body buffered as a single part
    max_part_size: u64,
}

impl MultipartBackend {
    pub fn new(store: Arc<dyn ObjectStore>, max_part_size: u64) -> Self {
        Self {
            store,
            max_part_size,
        }
    }

    fn object_key(path: &str) -> &str {
        path.trim_start_matches('/')
    }
}

#[async_trait]
impl UploadBackend for MultipartBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PartUpload
    }

    async fn stat(&self, path: &str) -> Result<Option<TargetInfo>, UploadError> {
        let key = Self::object_key(path);
        if key.is_empty() || key.ends_with('/') {
            return Ok(Some(TargetInfo { is_dir: true, size: 0 }));
        }

        if let Some(metadata) = self.store.head(key).await? {
            return Ok(Some(TargetInfo {
                is_dir: false,
                size: metadata.size.max(0) as u64,
            }));
        }

        if self.store.has_children(key).await? {
            return Ok(Some(TargetInfo { is_dir: true, size: 0 }));
        }

        Ok(None)
    }

    async fn begin_upload(&self, path: &str) -> Result<BackendHandle, UploadError> {
        let upload_id = self
            .store
            .create_multipart_upload(Self::object_key(path))
            .await?;

        tracing::debug!(path = %path, upload_id = %upload_id, "Started multipart upload");

        Ok(BackendHandle::multipart(upload_id))
    }

    async fn append(
        &self,
        path: &str,
        handle: &BackendHandle,
        _offset: u64,
        limit: u64,
        body: ChunkStream,
    ) -> Result<ChunkReceipt, UploadError> {
        let BackendHandle::Multipart { upload_id, parts } = handle else {
            return Err(UploadError::Internal(format!(
                "session for {} has no multipart upload",
                path
            )));
        };

        if parts.len() >= MAX_PARTS {
            return Err(UploadError::Unsupported(format!(
                "upload already has the maximum of {} parts",
                MAX_PARTS
            )));
        }

        let data = collect_body(body, limit.min(self.max_part_size), limit).await?;
        if data.is_empty() {
            // Nothing to store; an empty part would be rejected anyway
            return Ok(ChunkReceipt { written: 0, part: None });
        }

        let part_number = parts.len() as i32 + 1;
        let size = data.len() as u64;
        let etag = self
            .store
            .upload_part(Self::object_key(path), upload_id, part_number, data)
            .await?;

        tracing::debug!(
            path = %path,
            part_number = part_number,
            size = size,
            "Uploaded part"
        );

        Ok(ChunkReceipt {
            written: size,
            part: Some(CompletedPart {
                part_number,
                etag,
                size,
            }),
        })
    }

    async fn finalize(&self, path: &str, handle: &BackendHandle) -> Result<(), UploadError> {
        let BackendHandle::Multipart { upload_id, parts } = handle else {
            return Err(UploadError::Internal(format!(
                "session for {} has no multipart upload",
                path
            )));
        };
        let key = Self::object_key(path);

        if parts.is_empty() {
            // S3 cannot complete a multipart upload without parts
            self.store
                .put_object(key, Vec::new(), "application/octet-stream")
                .await?;
            if let Err(e) = self.store.abort_multipart_upload(key, upload_id).await {
                tracing::warn!(
                    path = %path,
                    upload_id = %upload_id,
                    error = %e,
                    "Failed to abort unused multipart upload"
                );
            }
            return Ok(());
        }

        self.store
            .complete_multipart_upload(key, upload_id, parts)
            .await?;
        Ok(())
    }

    async fn abandon(&self, path: &str, handle: &BackendHandle) -> Result<(), UploadError> {
        match handle {
            BackendHandle::Multipart { upload_id, .. } => {
                self.store
                    .abort_multipart_upload(Self::object_key(path), upload_id)
                    .await?;
                Ok(())
            }
            BackendHandle::Pending | BackendHandle::Sequential => Ok(()),
        }
    }
}

/// Buffer the whole chunk body; it becomes a single part.
///
/// `remaining` is what the session still expects; `max` additionally caps
/// the buffer size.
async fn collect_body(mut body: ChunkStream, max: u64, remaining: u64) -> Result<Bytes, UploadError> {
    let mut buffer = Vec::new();

    while let Some(frame) = body.next().await {
        let bytes = frame.map_err(|e| UploadError::Transport(e.to_string()))?;
        let total = buffer.len() as u64 + bytes.len() as u64;
        if total > remaining {
            return Err(UploadError::Validation(format!(
                "chunk exceeds the declared upload length ({} bytes remaining)",
                remaining
            )));
        }
        if total > max {
            return Err(UploadError::Validation(format!(
                "chunk exceeds the maximum part size of {} bytes",
                max
            )));
        }
        buffer.extend_from_slice(&bytes);
    }

    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use futures::stream;

    fn body(data: &'static [u8]) -> ChunkStream {
        stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(data))]).boxed()
    }

    fn with_part(handle: &BackendHandle, part: CompletedPart) -> BackendHandle {
        let BackendHandle::Multipart { upload_id, parts } = handle else {
            panic!("expected multipart handle");
        };
        let mut parts = parts.clone();
        parts.push(part);
        BackendHandle::Multipart {
            upload_id: upload_id.clone(),
            parts,
        }
    }

    #[tokio::test]
    async fn test_parts_assemble_in_order() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store.clone(), 1024);

        let handle = backend.begin_upload("/docs/a.bin").await.unwrap();
        assert_eq!(store.open_uploads(), 1);

        let first = backend
            .append("/docs/a.bin", &handle, 0, 10, body(b"Hello,"))
            .await
            .unwrap();
        assert_eq!(first.written, 6);
        let part = first.part.unwrap();
        assert_eq!(part.part_number, 1);
        let handle = with_part(&handle, part);

        let second = backend
            .append("/docs/a.bin", &handle, 6, 4, body(b" you"))
            .await
            .unwrap();
        assert_eq!(second.part.as_ref().unwrap().part_number, 2);
        let handle = with_part(&handle, second.part.unwrap());

        backend.finalize("/docs/a.bin", &handle).await.unwrap();
        assert_eq!(store.object("docs/a.bin").unwrap(), b"Hello, you");
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_failed_part_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store.clone(), 1024);
        let handle = backend.begin_upload("/a.bin").await.unwrap();

        store.fail_parts(true);
        let result = backend.append("/a.bin", &handle, 0, 10, body(b"abc")).await;
        assert!(matches!(result, Err(UploadError::Backend(_))));
    }

    #[tokio::test]
    async fn test_chunk_beyond_declared_length() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store, 1024);
        let handle = backend.begin_upload("/a.bin").await.unwrap();

        let result = backend.append("/a.bin", &handle, 0, 2, body(b"abc")).await;
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_upload_finalizes_to_empty_object() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store.clone(), 1024);
        let handle = backend.begin_upload("/empty.txt").await.unwrap();

        backend.finalize("/empty.txt", &handle).await.unwrap();
        assert_eq!(store.object("empty.txt").unwrap(), Vec::<u8>::new());
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_abandon_aborts_upload() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store.clone(), 1024);
        let handle = backend.begin_upload("/a.bin").await.unwrap();

        backend.abandon("/a.bin", &handle).await.unwrap();
        assert_eq!(store.open_uploads(), 0);
        assert_eq!(store.aborted().len(), 1);
    }

    #[tokio::test]
    async fn test_stat_detects_directories() {
        let store = Arc::new(MemoryStore::new());
        store.insert("photos/cat.jpg", b"meow");
        let backend = MultipartBackend::new(store, 1024);

        let file = backend.stat("/photos/cat.jpg").await.unwrap().unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 4);

        assert!(backend.stat("/photos").await.unwrap().unwrap().is_dir);
        assert!(backend.stat("/photos/").await.unwrap().unwrap().is_dir);
        assert!(backend.stat("/nothing").await.unwrap().is_none());
    }
}
