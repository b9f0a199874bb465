//! Process-local store implementations.
//!
//! Used by the `memory` backend for local development and by tests. Contents
//! are lost when the process exits.

use crate::blob_store::{expiry_after, AccessLink, BlobKeyLayout, BlobStore};
use crate::error::StoreError;
use crate::metadata_store::MetadataStore;
use crate::model::{Attributes, ImageId, ImageRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Blob held by [`InMemoryBlobStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub payload: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    layout: BlobKeyLayout,
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new(layout: BlobKeyLayout) -> Self {
        Self {
            layout,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Blob currently stored for `id`, if any
    pub fn get(&self, id: &ImageId) -> Option<StoredBlob> {
        let key = self.layout.key_for(id);
        self.blobs.read().ok()?.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(
        &self,
        id: &ImageId,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let key = self.layout.key_for(id);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StoreError::blob("store", &key, "blob map lock poisoned"))?;

        debug!(key = %key, size_bytes = payload.len(), "Stored blob in memory");
        blobs.insert(
            key,
            StoredBlob {
                payload,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn issue_access_link(
        &self,
        id: &ImageId,
        ttl: Duration,
    ) -> Result<AccessLink, StoreError> {
        let key = self.layout.key_for(id);
        let expires_at = expiry_after(ttl, &key)?;

        Ok(AccessLink {
            url: format!("memory://{}?expires={}", key, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn remove(&self, id: &ImageId) -> Result<(), StoreError> {
        let key = self.layout.key_for(id);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StoreError::blob("remove", &key, "blob map lock poisoned"))?;

        blobs.remove(&key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<ImageId, Attributes>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ImageId) -> Option<Attributes> {
        self.records.read().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put(&self, id: &ImageId, attributes: &Attributes) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::metadata("put", "record map lock poisoned"))?;

        records.insert(id.clone(), attributes.clone());
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::metadata("scan", "record map lock poisoned"))?;

        Ok(records
            .iter()
            .map(|(id, attributes)| ImageRecord {
                image_id: id.clone(),
                metadata: attributes.clone(),
            })
            .collect())
    }

    async fn remove(&self, id: &ImageId) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::metadata("remove", "record map lock poisoned"))?;

        records.remove(id);
        Ok(())
    }
}
