//! Image operations spanning the blob store and the metadata store.
//!
//! Every operation is a straight sequence of store calls that stops at the
//! first fault. Nothing is retried or rolled back:
//!
//! - upload writes the blob before the metadata record, so a metadata fault
//!   leaves an orphaned blob whose identity was never returned;
//! - delete removes the blob before the metadata record, so a metadata fault
//!   leaves a record without a blob and the caller is told the delete failed.

use crate::blob_store::{AccessLink, BlobStore};
use crate::error::ImageError;
use crate::metadata_store::MetadataStore;
use crate::model::{Attributes, ImageFilter, ImageId, ImageRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, instrument, Span};

/// Image to be uploaded, already decoded from the wire
#[derive(Debug, Clone)]
pub struct NewImage {
    pub payload: Vec<u8>,
    pub attributes: Attributes,
    /// Falls back to the service default when absent
    pub content_type: Option<String>,
}

/// Orchestrates image operations across both stores
#[derive(Clone)]
pub struct ImageService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    access_link_ttl: Duration,
    default_content_type: String,
    span: Span,
}

impl ImageService {
    /// Create a service over the given stores.
    ///
    /// `span` is the parent of every operation span the service emits.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        access_link_ttl: Duration,
        default_content_type: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            blobs,
            metadata,
            access_link_ttl,
            default_content_type: default_content_type.into(),
            span,
        }
    }

    /// Service with the default one hour link lifetime and JPEG content type
    pub fn with_defaults(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self::new(
            blobs,
            metadata,
            Duration::from_secs(3600),
            "image/jpeg",
            info_span!("image_service"),
        )
    }

    /// Store a new image and return its freshly issued identity
    #[instrument(
        parent = &self.span,
        skip(self, image),
        fields(image_id = tracing::field::Empty, size_bytes = image.payload.len())
    )]
    pub async fn upload(&self, image: NewImage) -> Result<ImageId, ImageError> {
        let image_id = ImageId::generate();
        Span::current().record("image_id", tracing::field::display(&image_id));

        let content_type = image
            .content_type
            .as_deref()
            .unwrap_or(&self.default_content_type)
            .to_string();

        if let Err(e) = self.blobs.store(&image_id, image.payload, &content_type).await {
            error!(error = %e, "Failed to store image blob");
            return Err(self.failed("upload", e.into()));
        }

        if let Err(e) = self.metadata.put(&image_id, &image.attributes).await {
            error!(
                error = %e,
                orphaned_blob = %image_id,
                "Failed to save image metadata, blob left without a record"
            );
            return Err(self.failed("upload", e.into()));
        }

        metrics::counter!("images.uploaded").increment(1);
        info!("Image uploaded successfully");

        Ok(image_id)
    }

    /// Every metadata record matching `filter`
    #[instrument(parent = &self.span, skip(self))]
    pub async fn list(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>, ImageError> {
        let records = self.metadata.scan_all().await.map_err(|e| {
            error!(error = %e, "Failed to scan image metadata");
            self.failed("list", e.into())
        })?;

        let scanned = records.len();
        let matching: Vec<ImageRecord> = records
            .into_iter()
            .filter(|record| filter.matches(&record.metadata))
            .collect();

        metrics::counter!("images.listed").increment(1);
        info!(scanned, matched = matching.len(), "Listed images successfully");

        Ok(matching)
    }

    /// Temporary read link for the blob of `image_id`.
    ///
    /// The metadata store is not consulted, so a link is issued even for
    /// identities that have no blob.
    #[instrument(parent = &self.span, skip(self, image_id), fields(image_id = %image_id))]
    pub async fn view(&self, image_id: &ImageId) -> Result<AccessLink, ImageError> {
        let link = self
            .blobs
            .issue_access_link(image_id, self.access_link_ttl)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to issue access link");
                self.failed("view", e.into())
            })?;

        metrics::counter!("images.links_issued").increment(1);
        info!(expires_at = %link.expires_at, "Generated access link");

        Ok(link)
    }

    /// Remove the blob and then the metadata record of `image_id`
    #[instrument(parent = &self.span, skip(self, image_id), fields(image_id = %image_id))]
    pub async fn delete(&self, image_id: &ImageId) -> Result<(), ImageError> {
        if let Err(e) = self.blobs.remove(image_id).await {
            error!(error = %e, "Failed to delete image blob, metadata left intact");
            return Err(self.failed("delete", e.into()));
        }

        if let Err(e) = self.metadata.remove(image_id).await {
            error!(
                error = %e,
                "Blob deleted but metadata record survived, manual reconciliation required"
            );
            return Err(self.failed(
                "delete",
                ImageError::IncompleteDelete {
                    image_id: image_id.clone(),
                    source: e,
                },
            ));
        }

        metrics::counter!("images.deleted").increment(1);
        info!("Image deleted successfully");

        Ok(())
    }

    /// Metadata store connectivity, for readiness probes
    pub async fn health_check(&self) -> Result<(), ImageError> {
        self.metadata.health_check().await.map_err(ImageError::from)
    }

    fn failed(&self, operation: &'static str, error: ImageError) -> ImageError {
        metrics::counter!("images.operation_failures", "operation" => operation).increment(1);
        error
    }
}
