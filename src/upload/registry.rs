//! Upload Session Registry
//!
//! The single authority for which uploads are in flight:
//! - In-memory session table keyed by target path
//! - Sliding idle deadline per session
//! - Per-key writer lock serializing chunk appends
//! - Background sweep that evicts idle sessions and releases their backend state

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::backend::UploadBackend;
use super::types::{BackendHandle, ChunkReceipt, UploadError, UploadSession};

// ============================================================================
// Session Registry
// ============================================================================

/// Shared table of upload sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Active sessions indexed by target path
    sessions: RwLock<HashMap<String, Entry>>,

    /// Sliding idle window
    idle_timeout: Duration,
}

struct Entry {
    session: UploadSession,
    /// Held for the duration of one chunk append
    writer: Arc<Mutex<()>>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Register a new session for `path`
    pub async fn create(
        &self,
        path: &str,
        declared_length: u64,
        handle: BackendHandle,
    ) -> Result<UploadSession, UploadError> {
        let (session, _writer) = self.insert(path, declared_length, handle).await?;
        Ok(session)
    }

    /// Claim `path` for a Begin whose backend state is not prepared yet.
    ///
    /// The session is registered as [`BackendHandle::Pending`] and its writer
    /// lock is returned already held, so appends, abandons and the sweep keep
    /// off the key until [`activate`](Self::activate) fills in the handle.
    pub async fn reserve(
        &self,
        path: &str,
        declared_length: u64,
    ) -> Result<(UploadSession, OwnedMutexGuard<()>), UploadError> {
        self.insert(path, declared_length, BackendHandle::Pending).await
    }

    /// Attach the prepared backend handle to a reserved session
    pub async fn activate(
        &self,
        path: &str,
        session_id: Uuid,
        handle: BackendHandle,
    ) -> Result<UploadSession, UploadError> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(path)
            .filter(|entry| entry.session.id == session_id)
            .ok_or_else(|| UploadError::NotFound(format!("reservation for {} is gone", path)))?;

        entry.session.handle = handle;
        entry.session.expires_at = Instant::now() + self.inner.idle_timeout;
        Ok(entry.session.clone())
    }

    async fn insert(
        &self,
        path: &str,
        declared_length: u64,
        handle: BackendHandle,
    ) -> Result<(UploadSession, OwnedMutexGuard<()>), UploadError> {
        let mut sessions = self.inner.sessions.write().await;
        if sessions.contains_key(path) {
            return Err(UploadError::Conflict(format!(
                "an upload is already in progress for {}",
                path
            )));
        }

        let session = UploadSession::new(
            path.to_string(),
            declared_length,
            handle,
            self.inner.idle_timeout,
        );
        let writer = Arc::new(Mutex::new(()));
        // Fresh and unshared, so this never waits
        let guard = writer.clone().lock_owned().await;
        sessions.insert(
            path.to_string(),
            Entry {
                session: session.clone(),
                writer,
            },
        );

        tracing::info!(
            session_id = %session.id,
            path = %path,
            declared_length = declared_length,
            "Created upload session"
        );

        Ok((session, guard))
    }

    /// Snapshot of the session for `path`
    pub async fn get(&self, path: &str) -> Result<UploadSession, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(path)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| UploadError::NotFound(format!("no active upload for {}", path)))
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.inner.sessions.read().await.contains_key(path)
    }

    /// Push the idle deadline of `path` forward
    pub async fn touch(&self, path: &str) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(entry) = sessions.get_mut(path) {
            entry.session.expires_at = Instant::now() + self.inner.idle_timeout;
        }
    }

    /// Remove the session for `path`, if any
    pub async fn delete(&self, path: &str) -> Option<UploadSession> {
        let removed = self
            .inner
            .sessions
            .write()
            .await
            .remove(path)
            .map(|entry| entry.session);

        if let Some(session) = &removed {
            tracing::debug!(
                session_id = %session.id,
                path = %path,
                "Removed upload session"
            );
        }

        removed
    }

    /// Take the writer lock of `path` without waiting.
    ///
    /// Held across an append, an abandon and the preparation of a Begin. A
    /// second request racing on the same key gets a conflict instead of
    /// queueing behind the first one.
    pub async fn acquire_writer(&self, path: &str) -> Result<OwnedMutexGuard<()>, UploadError> {
        let writer = {
            let sessions = self.inner.sessions.read().await;
            let entry = sessions
                .get(path)
                .ok_or_else(|| UploadError::NotFound(format!("no active upload for {}", path)))?;
            entry.writer.clone()
        };

        writer.try_lock_owned().map_err(|_| {
            UploadError::Conflict(format!("another request for {} is still in progress", path))
        })
    }

    /// Apply a backend receipt to the session.
    ///
    /// Fails if the session moved on, vanished or was replaced by a new one
    /// under the same key while the chunk was being written.
    pub async fn commit(
        &self,
        path: &str,
        session_id: Uuid,
        expected_offset: u64,
        receipt: ChunkReceipt,
    ) -> Result<UploadSession, UploadError> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(path)
            .ok_or_else(|| UploadError::NotFound(format!("no active upload for {}", path)))?;
        let session = &mut entry.session;

        if session.id != session_id {
            return Err(UploadError::NotFound(format!(
                "upload for {} was replaced while the chunk was written",
                path
            )));
        }

        if session.committed_offset != expected_offset {
            return Err(UploadError::OffsetMismatch {
                expected: session.committed_offset,
                actual: expected_offset,
            });
        }

        let new_offset = session.committed_offset + receipt.written;
        if new_offset > session.declared_length {
            return Err(UploadError::Internal(format!(
                "commit of {} bytes would pass the declared length {}",
                receipt.written, session.declared_length
            )));
        }

        match receipt.part {
            Some(part) => {
                let BackendHandle::Multipart { parts, .. } = &mut session.handle else {
                    return Err(UploadError::Internal(
                        "non-multipart upload received a part".to_string(),
                    ));
                };
                if part.part_number as usize != parts.len() + 1 || part.size != receipt.written {
                    return Err(UploadError::Internal(format!(
                        "part {} ({} bytes) does not follow {} recorded parts",
                        part.part_number,
                        part.size,
                        parts.len()
                    )));
                }
                parts.push(part);
            }
            None => {
                if receipt.written > 0 && matches!(session.handle, BackendHandle::Multipart { .. }) {
                    return Err(UploadError::Internal(
                        "multipart upload committed bytes without a part".to_string(),
                    ));
                }
            }
        }

        session.committed_offset = new_offset;
        session.expires_at = Instant::now() + self.inner.idle_timeout;

        Ok(session.clone())
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Evict every session idle at `now` and release its backend state.
    ///
    /// The table lock is held only while a single session is removed.
    /// Backend failures are logged and otherwise ignored.
    pub async fn sweep_expired(&self, now: Instant, backend: &dyn UploadBackend) -> usize {
        let candidates: Vec<String> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, entry)| entry.session.is_expired_at(now))
                .map(|(path, _)| path.clone())
                .collect()
        };

        let mut evicted = 0;
        for path in candidates {
            let session = {
                let mut sessions = self.inner.sessions.write().await;
                let idle = sessions.get(&path).is_some_and(|entry| {
                    entry.session.is_expired_at(now) && entry.writer.try_lock().is_ok()
                });
                if idle {
                    sessions.remove(&path).map(|entry| entry.session)
                } else {
                    None
                }
            };

            let Some(session) = session else {
                continue;
            };
            evicted += 1;

            match backend.abandon(&session.path, &session.handle).await {
                Ok(()) => tracing::info!(
                    session_id = %session.id,
                    path = %session.path,
                    committed_offset = session.committed_offset,
                    declared_length = session.declared_length,
                    "Evicted idle upload"
                ),
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    path = %session.path,
                    error = %e,
                    "Failed to release backend state of idle upload"
                ),
            }
        }

        if evicted > 0 {
            tracing::info!(count = evicted, "Cleaned up idle upload sessions");
        }

        evicted
    }

    /// Start the background sweep; it runs until the handle is stopped or dropped
    pub fn start_sweeper(&self, period: Duration, backend: Arc<dyn UploadBackend>) -> SweeperHandle {
        let registry = self.clone();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        registry.sweep_expired(Instant::now(), backend.as_ref()).await;
                    }
                }
            }

            tracing::debug!("Upload sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

/// Running background sweep
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweep to stop and wait for it
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Upload sweeper ended abnormally");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::CompletedPart;
    use crate::upload::multipart::MultipartBackend;
    use crate::upload::sequential::LocalBackend;
    use tempfile::TempDir;

    fn receipt(written: u64) -> ChunkReceipt {
        ChunkReceipt { written, part: None }
    }

    fn part_receipt(part_number: i32, size: u64) -> ChunkReceipt {
        ChunkReceipt {
            written: size,
            part: Some(CompletedPart {
                part_number,
                etag: format!("etag-{}", part_number),
                size,
            }),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let session = registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        assert_eq!(session.committed_offset, 0);
        assert_eq!(session.declared_length, 10);

        let fetched = registry.get("/a.bin").await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(registry.contains("/a.bin").await);
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let result = registry.create("/a.bin", 20, BackendHandle::Sequential).await;
        assert!(matches!(result, Err(UploadError::Conflict(_))));
        assert_eq!(registry.get("/a.bin").await.unwrap().declared_length, 10);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert!(matches!(registry.get("/nope").await, Err(UploadError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        assert!(registry.delete("/a.bin").await.is_some());
        assert!(registry.delete("/a.bin").await.is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_touch_extends_deadline() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let before = registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.touch("/a.bin").await;

        let after = registry.get("/a.bin").await.unwrap();
        assert!(after.expires_at > before.expires_at);
    }

    #[tokio::test]
    async fn test_commit_advances_offset() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let id = registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap().id;

        let session = registry.commit("/a.bin", id, 0, receipt(4)).await.unwrap();
        assert_eq!(session.committed_offset, 4);

        let stale = registry.commit("/a.bin", id, 0, receipt(4)).await;
        assert!(matches!(
            stale,
            Err(UploadError::OffsetMismatch { expected: 4, actual: 0 })
        ));

        let overflow = registry.commit("/a.bin", id, 4, receipt(7)).await;
        assert!(matches!(overflow, Err(UploadError::Internal(_))));
        assert_eq!(registry.get("/a.bin").await.unwrap().committed_offset, 4);
    }

    #[tokio::test]
    async fn test_commit_requires_contiguous_parts() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let id = registry
            .create("/a.bin", 10, BackendHandle::multipart("upload-1"))
            .await
            .unwrap()
            .id;

        let session = registry.commit("/a.bin", id, 0, part_receipt(1, 6)).await.unwrap();
        assert_eq!(session.handle.parts().len(), 1);
        assert_eq!(session.committed_offset, 6);

        let skipped = registry.commit("/a.bin", id, 6, part_receipt(3, 4)).await;
        assert!(matches!(skipped, Err(UploadError::Internal(_))));

        let session = registry.commit("/a.bin", id, 6, part_receipt(2, 4)).await.unwrap();
        let total: u64 = session.handle.parts().iter().map(|p| p.size).sum();
        assert_eq!(total, session.committed_offset);
    }

    #[tokio::test]
    async fn test_commit_rejects_replaced_session() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let old = registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();
        registry.delete("/a.bin").await;
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let result = registry.commit("/a.bin", old.id, 0, receipt(4)).await;
        assert!(matches!(result, Err(UploadError::NotFound(_))));
        assert_eq!(registry.get("/a.bin").await.unwrap().committed_offset, 0);
    }

    #[tokio::test]
    async fn test_reservation_holds_key_until_activated() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let (reserved, writer) = registry.reserve("/a.bin", 10).await.unwrap();
        assert_eq!(reserved.handle, BackendHandle::Pending);

        assert!(matches!(
            registry.reserve("/a.bin", 10).await,
            Err(UploadError::Conflict(_))
        ));
        assert!(matches!(
            registry.acquire_writer("/a.bin").await,
            Err(UploadError::Conflict(_))
        ));

        let active = registry
            .activate("/a.bin", reserved.id, BackendHandle::multipart("upload-1"))
            .await
            .unwrap();
        assert_eq!(active.handle, BackendHandle::multipart("upload-1"));

        drop(writer);
        assert!(registry.acquire_writer("/a.bin").await.is_ok());
    }

    #[tokio::test]
    async fn test_writer_lock_is_exclusive() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let guard = registry.acquire_writer("/a.bin").await.unwrap();
        assert!(matches!(
            registry.acquire_writer("/a.bin").await,
            Err(UploadError::Conflict(_))
        ));

        drop(guard);
        assert!(registry.acquire_writer("/a.bin").await.is_ok());
        assert!(matches!(
            registry.acquire_writer("/other").await,
            Err(UploadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_deletes_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path().to_path_buf());
        let registry = SessionRegistry::new(Duration::from_secs(60));

        let handle = backend.begin_upload("/a.bin").await.unwrap();
        registry.create("/a.bin", 10, handle).await.unwrap();
        registry.create("/fresh.bin", 10, BackendHandle::Sequential).await.unwrap();

        // Nothing is idle yet
        assert_eq!(registry.sweep_expired(Instant::now(), &backend).await, 0);

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep_expired(later, &backend).await, 2);
        assert!(!temp_dir.path().join("a.bin").exists());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_aborts_multipart_upload() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store.clone(), 1024);
        let registry = SessionRegistry::new(Duration::from_secs(60));

        let handle = backend.begin_upload("/a.bin").await.unwrap();
        registry.create("/a.bin", 10, handle).await.unwrap();

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep_expired(later, &backend).await, 1);
        assert_eq!(store.open_uploads(), 0);
        assert_eq!(store.aborted(), vec!["upload-1".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_skips_session_being_written() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store, 1024);
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let _guard = registry.acquire_writer("/a.bin").await.unwrap();
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep_expired(later, &backend).await, 0);
        assert!(registry.contains("/a.bin").await);
    }

    #[tokio::test]
    async fn test_sweep_failure_still_evicts() {
        let store = Arc::new(MemoryStore::new());
        let backend = MultipartBackend::new(store, 1024);
        let registry = SessionRegistry::new(Duration::from_secs(60));

        // The store never issued this upload id, so abort fails
        registry
            .create("/a.bin", 10, BackendHandle::multipart("unknown"))
            .await
            .unwrap();

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep_expired(later, &backend).await, 1);
        assert!(!registry.contains("/a.bin").await);
    }

    #[tokio::test]
    async fn test_sweeper_task_evicts_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let backend: Arc<dyn UploadBackend> =
            Arc::new(LocalBackend::new(temp_dir.path().to_path_buf()));
        let registry = SessionRegistry::new(Duration::from_millis(20));

        let handle = backend.begin_upload("/a.bin").await.unwrap();
        registry.create("/a.bin", 10, handle).await.unwrap();

        let sweeper = registry.start_sweeper(Duration::from_millis(10), backend);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(registry.session_count().await, 0);
        assert!(!temp_dir.path().join("a.bin").exists());
        sweeper.stop().await;
    }
}
