//! In-memory [`ObjectStore`] used by tests of the multipart backend

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::StorageError;

use super::{CompletedPart, ObjectMetadata, ObjectStore};

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    /// upload id -> (key, part number -> data)
    uploads: HashMap<String, (String, HashMap<i32, Bytes>)>,
    aborted: Vec<String>,
    next_id: u64,
    fail_parts: bool,
    fail_creates: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.state.lock().unwrap().objects.insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    /// Make every subsequent `create_multipart_upload` fail
    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_creates = fail;
    }

    /// Make every subsequent `upload_part` fail
    pub fn fail_parts(&self, fail: bool) {
        self.state.lock().unwrap().fail_parts = fail;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.objects.get(key).map(|data| ObjectMetadata {
            size: data.len() as i64,
        }))
    }

    async fn has_children(&self, key: &str) -> Result<bool, StorageError> {
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let state = self.state.lock().unwrap();
        Ok(state.objects.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn put_object(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        self.state.lock().unwrap().objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates {
            return Err(StorageError::SdkError("service unavailable".to_string()));
        }
        state.next_id += 1;
        let id = format!("upload-{}", state.next_id);
        state.uploads.insert(id.clone(), (key.to_string(), HashMap::new()));
        Ok(id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_parts {
            return Err(StorageError::SdkError("connection reset".to_string()));
        }
        let (_, parts) = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::ObjectNotFound(upload_id.to_string()))?;
        parts.insert(part_number, data);
        Ok(format!("\"etag-{}\"", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let (key, stored) = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::ObjectNotFound(upload_id.to_string()))?;

        let mut assembled = Vec::new();
        for part in parts {
            let data = stored
                .get(&part.part_number)
                .ok_or_else(|| StorageError::InvalidResponse(format!("missing part {}", part.part_number)))?;
            assembled.extend_from_slice(data);
        }
        state.objects.insert(key, assembled);
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::ObjectNotFound(upload_id.to_string()))?;
        state.aborted.push(upload_id.to_string());
        Ok(())
    }
}
