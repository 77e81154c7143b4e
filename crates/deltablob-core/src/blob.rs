//! In-memory blob registry.
//!
//! The runtime `ResourceAllocator` used outside of tests: every created blob
//! gets a unique `blob:deltablob/<uuid>` URL and stays readable until it is
//! revoked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use deltablob_state::{
    BlobUrl, ContentDigest, ResourceAllocator, ResourceHandle, StateError, StateResult,
};
use serde::{Deserialize, Serialize};

/// URL scheme prefix of every blob minted by [`BlobRegistry`].
pub const BLOB_URL_PREFIX: &str = "blob:deltablob/";

/// Descriptive data about a live blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub url: BlobUrl,
    pub media_type: String,
    pub digest: ContentDigest,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoredBlob {
    metadata: BlobMetadata,
    content: Arc<[u8]>,
}

/// Process-local blob store handing out revocable URLs.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: Mutex<HashMap<BlobUrl, StoredBlob>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<BlobUrl, StoredBlob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Content of a live blob. Revoked or unknown URLs yield `None`.
    pub fn read(&self, url: &BlobUrl) -> Option<Arc<[u8]>> {
        self.blobs().get(url).map(|blob| Arc::clone(&blob.content))
    }

    pub fn metadata(&self, url: &BlobUrl) -> Option<BlobMetadata> {
        self.blobs().get(url).map(|blob| blob.metadata.clone())
    }

    /// Number of live blobs.
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceAllocator for BlobRegistry {
    fn create(&self, parts: Vec<Vec<u8>>, media_type: &str) -> StateResult<ResourceHandle> {
        let url = BlobUrl::new(format!("{BLOB_URL_PREFIX}{}", uuid::Uuid::new_v4()));
        let digest = ContentDigest::from_parts(&parts);
        let content: Arc<[u8]> = parts.concat().into();

        let metadata = BlobMetadata {
            url: url.clone(),
            media_type: media_type.to_string(),
            digest,
            size: content.len() as u64,
            created_at: Utc::now(),
        };
        tracing::trace!(url = %url, digest = %metadata.digest.short(), size = metadata.size, "blob stored");

        self.blobs()
            .insert(url.clone(), StoredBlob { metadata, content });
        Ok(ResourceHandle::new(url))
    }

    fn revoke(&self, handle: ResourceHandle) -> StateResult<()> {
        match self.blobs().remove(handle.url()) {
            Some(_) => Ok(()),
            None => Err(StateError::UnknownHandle {
                url: handle.url().to_string(),
            }),
        }
    }
}
