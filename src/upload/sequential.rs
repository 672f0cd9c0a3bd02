//! Sequential-append backend
//!
//! Writes chunks straight into the target file under a root directory.
//! The file length is the commit record, so it is always brought back to
//! the session's committed offset before and after a failed append.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::backend::{BackendKind, ChunkStream, TargetInfo, UploadBackend};
use super::types::{BackendHandle, ChunkReceipt, UploadError};

/// Local filesystem backend
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl UploadBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SequentialAppend
    }

    async fn stat(&self, path: &str) -> Result<Option<TargetInfo>, UploadError> {
        match tokio::fs::metadata(self.target_path(path)).await {
            Ok(metadata) => Ok(Some(TargetInfo {
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn begin_upload(&self, path: &str) -> Result<BackendHandle, UploadError> {
        let target = self.target_path(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&target)
            .await?;

        Ok(BackendHandle::Sequential)
    }

    async fn append(
        &self,
        path: &str,
        _handle: &BackendHandle,
        offset: u64,
        limit: u64,
        body: ChunkStream,
    ) -> Result<ChunkReceipt, UploadError> {
        let target = self.target_path(path);
        let mut file = OpenOptions::new().write(true).open(&target).await?;

        // Bytes past the offset belong to an interrupted chunk
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        match copy_limited(&mut file, body, limit).await {
            Ok(written) => Ok(ChunkReceipt { written, part: None }),
            Err(e) => {
                if let Err(truncate_err) = file.set_len(offset).await {
                    tracing::warn!(
                        path = %path,
                        offset = offset,
                        error = %truncate_err,
                        "Failed to roll back partial chunk"
                    );
                }
                Err(e)
            }
        }
    }

    async fn finalize(&self, _path: &str, _handle: &BackendHandle) -> Result<(), UploadError> {
        Ok(())
    }

    async fn abandon(&self, path: &str, handle: &BackendHandle) -> Result<(), UploadError> {
        // The target was never prepared for this session
        if *handle == BackendHandle::Pending {
            return Ok(());
        }

        match tokio::fs::remove_file(self.target_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Stream `body` into `file`, refusing to write more than `limit` bytes
async fn copy_limited(file: &mut File, mut body: ChunkStream, limit: u64) -> Result<u64, UploadError> {
    let mut written = 0u64;

    while let Some(frame) = body.next().await {
        let bytes = frame.map_err(|e| UploadError::Transport(e.to_string()))?;
        if written + bytes.len() as u64 > limit {
            return Err(UploadError::Validation(format!(
                "chunk exceeds the declared upload length ({} bytes remaining)",
                limit
            )));
        }
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_data().await?;
    Ok(written)
}
