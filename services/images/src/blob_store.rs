use crate::config::S3Config;
use crate::error::StoreError;
use crate::model::ImageId;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Time-limited link granting read access to a blob
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage for raw image bytes keyed by image identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `payload` under the key derived from `id`. Overwrites silently.
    async fn store(&self, id: &ImageId, payload: Vec<u8>, content_type: &str)
        -> Result<(), StoreError>;

    /// Issue a read link for the blob of `id` without checking that it exists
    async fn issue_access_link(&self, id: &ImageId, ttl: Duration)
        -> Result<AccessLink, StoreError>;

    /// Delete the blob of `id`; deleting a missing blob succeeds
    async fn remove(&self, id: &ImageId) -> Result<(), StoreError>;
}

/// Derives blob keys from image identities: `{prefix}{id}.{extension}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKeyLayout {
    prefix: String,
    extension: String,
}

impl BlobKeyLayout {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn key_for(&self, id: &ImageId) -> String {
        format!("{}{}.{}", self.prefix, id, self.extension)
    }
}

impl Default for BlobKeyLayout {
    fn default() -> Self {
        Self::new("images/", "jpg")
    }
}

/// Wall-clock instant at which a link issued now for `ttl` stops working
pub(crate) fn expiry_after(ttl: Duration, key: &str) -> Result<DateTime<Utc>, StoreError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| StoreError::blob("presign", key, e.to_string()))?;
    Ok(Utc::now() + ttl)
}

/// S3 rejects parts below 5MB except the last one
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// How a payload of a given size is sent to S3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadPlan {
    Single,
    Multipart { parts: usize },
}

impl UploadPlan {
    /// Payloads strictly larger than `threshold` go multipart, split into
    /// `part_size` chunks with a shorter final part
    pub(crate) fn for_payload(size_bytes: usize, threshold: usize, part_size: usize) -> Self {
        if size_bytes > threshold {
            UploadPlan::Multipart {
                parts: size_bytes.div_ceil(part_size.max(1)),
            }
        } else {
            UploadPlan::Single
        }
    }
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    layout: BlobKeyLayout,
    multipart_threshold: usize,
    part_size: usize,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config, layout: BlobKeyLayout) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            layout,
            multipart_threshold: config.multipart_threshold_bytes,
            part_size: config.part_size_bytes.max(MIN_PART_SIZE),
        }
    }

    /// Simple single-part upload for small payloads
    async fn simple_upload(
        &self,
        id: &ImageId,
        key: &str,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(payload))
            .content_type(content_type)
            .metadata("image-id", id.as_str())
            .send()
            .await
            .map_err(|e| StoreError::blob("store", key, e))?;

        Ok(())
    }

    /// Multipart upload for large payloads
    async fn multipart_upload(
        &self,
        id: &ImageId,
        key: &str,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .metadata("image-id", id.as_str())
            .send()
            .await
            .map_err(|e| StoreError::blob("store", key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::blob("store", key, "no upload id in response"))?
            .to_string();

        match self.upload_parts(key, &upload_id, &payload).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| StoreError::blob("store", key, e))?;

                Ok(())
            }
            Err(e) => {
                // Abort so S3 discards the parts already uploaded
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        payload: &[u8],
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in payload.chunks(self.part_size).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| StoreError::blob("store", key, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, payload), fields(image_id = %id, size_bytes = payload.len()))]
    async fn store(
        &self,
        id: &ImageId,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let key = self.layout.key_for(id);
        let size_bytes = payload.len();

        debug!(key = %key, "Uploading image to S3");

        match UploadPlan::for_payload(size_bytes, self.multipart_threshold, self.part_size) {
            UploadPlan::Single => {
                self.simple_upload(id, &key, payload, content_type).await?;
            }
            UploadPlan::Multipart { parts } => {
                debug!(key = %key, parts, "Using multipart upload");
                self.multipart_upload(id, &key, payload, content_type).await?;
            }
        }

        info!(key = %key, size_bytes, "Image uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self), fields(image_id = %id))]
    async fn issue_access_link(
        &self,
        id: &ImageId,
        ttl: Duration,
    ) -> Result<AccessLink, StoreError> {
        let key = self.layout.key_for(id);

        let presigning_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::blob("presign", &key, e))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::blob("presign", &key, e))?;

        let expires_at = expiry_after(ttl, &key)?;

        debug!(key = %key, expires_at = %expires_at, "Presigned URL generated");

        Ok(AccessLink {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    #[instrument(skip(self), fields(image_id = %id))]
    async fn remove(&self, id: &ImageId) -> Result<(), StoreError> {
        let key = self.layout.key_for(id);

        // DeleteObject succeeds for missing keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StoreError::blob("remove", &key, e))?;

        debug!(key = %key, "Image deleted from S3");
        Ok(())
    }
}
