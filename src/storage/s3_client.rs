//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
    Client,
};
use axum::body::Bytes;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};

use super::types::{CompletedPart, ListOptions, ObjectList, ObjectMetadata};
use super::ObjectStore;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "resumable-upload",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    DisplayErrorContext(&e)
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List objects in the bucket
    pub async fn list_objects(&self, options: ListOptions) -> std::result::Result<ObjectList, StorageError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(prefix) = options.prefix.as_deref() {
            request = request.prefix(prefix);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        let prefix = options.prefix.unwrap_or_default();
        let response = request
            .send()
            .await
            .map_err(|e| sdk_error(&prefix, "list objects under", e))?;

        let keys: Vec<String> = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|s| s.to_string()))
            .collect();

        let prefixes: Vec<String> = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(|s| s.to_string()))
            .collect();

        Ok(ObjectList { keys, prefixes })
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn head(&self, key: &str) -> std::result::Result<Option<ObjectMetadata>, StorageError> {
        let response = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return match sdk_error(key, "head object", e) {
                    StorageError::ObjectNotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        Ok(Some(ObjectMetadata {
            size: response.content_length().unwrap_or(0),
        }))
    }

    async fn has_children(&self, key: &str) -> std::result::Result<bool, StorageError> {
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let listing = self
            .list_objects(ListOptions::new().with_prefix(prefix).with_max_keys(1))
            .await?;
        Ok(!listing.keys.is_empty() || !listing.prefixes.is_empty())
    }

    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| sdk_error(key, "put object", e))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> std::result::Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(key, "create multipart upload for", e))?;

        response
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| StorageError::InvalidResponse(format!("no upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> std::result::Result<String, StorageError> {
        let content_length = data.len() as i64;
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error(key, "upload part of", e))?;

        response
            .e_tag()
            .map(|tag| tag.to_string())
            .ok_or_else(|| {
                StorageError::InvalidResponse(format!("no ETag returned for part {} of {}", part_number, key))
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> std::result::Result<(), StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        S3CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error(key, "complete multipart upload for", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> std::result::Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error(key, "abort multipart upload for", e))?;
        Ok(())
    }
}

/// Map an SDK failure onto [`StorageError`] using the service error code
fn sdk_error<E, R>(key: &str, action: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match err.as_service_error().and_then(|e| e.code()) {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchUpload") => {
            StorageError::ObjectNotFound(key.to_string())
        }
        Some("AccessDenied") => StorageError::AccessDenied(key.to_string()),
        _ => StorageError::SdkError(format!(
            "Failed to {} {}: {}",
            action,
            key,
            DisplayErrorContext(&err)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_builder() {
        let options = ListOptions::new()
            .with_prefix("uploads/")
            .with_max_keys(1);

        assert_eq!(options.prefix, Some("uploads/".to_string()));
        assert_eq!(options.max_keys, Some(1));
    }
}
