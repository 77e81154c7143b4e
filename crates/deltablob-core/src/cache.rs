//! Resource cache controller.
//!
//! Owns the mapping from bundle identifier to the currently published blob
//! handle. Every handle it creates is revoked exactly once: when a changed
//! artifact supersedes it, or on explicit eviction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use deltablob_state::{BlobUrl, ResourceAllocator, ResourceHandle, StateResult};
use serde::{Deserialize, Serialize};

use crate::obs::{emit_blob_created, emit_blob_reused, emit_blob_revoked};

/// Line separator written after every segment.
///
/// Keeps each module's embedded source-map offsets aligned within the joined
/// blob.
pub const SEGMENT_SEPARATOR: &str = "\n";

/// What `publish` did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Artifact unchanged; the existing blob is handed out again
    Reused,
    /// First blob for this identifier
    Created,
    /// New blob published, previous one revoked
    Replaced,
}

/// Result of a publish step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub url: BlobUrl,
    pub outcome: PublishOutcome,
}

/// Turn segments into blob parts, each followed by [`SEGMENT_SEPARATOR`].
pub fn join_segments(segments: &[&str]) -> Vec<Vec<u8>> {
    segments
        .iter()
        .map(|segment| {
            let mut part = Vec::with_capacity(segment.len() + SEGMENT_SEPARATOR.len());
            part.extend_from_slice(segment.as_bytes());
            part.extend_from_slice(SEGMENT_SEPARATOR.as_bytes());
            part
        })
        .collect()
}

/// Identifier → published handle, backed by an allocator.
pub struct ResourceCache<A: ResourceAllocator> {
    allocator: A,
    media_type: String,
    entries: Mutex<HashMap<String, ResourceHandle>>,
}

impl<A: ResourceAllocator> ResourceCache<A> {
    pub fn new(allocator: A, media_type: &str) -> Self {
        Self {
            allocator,
            media_type: media_type.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ResourceHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the artifact state of a completed cycle.
    ///
    /// An unchanged artifact with an existing entry reuses that entry without
    /// touching the allocator. Otherwise a new blob is created from
    /// `segments` and any previous blob is revoked. An allocation failure
    /// leaves the previous entry in place.
    ///
    /// # Panics
    ///
    /// If the allocator refuses to revoke a handle this cache owns. That is
    /// a broken ownership invariant, not a runtime condition.
    pub fn publish(
        &self,
        identifier: &str,
        artifact_changed: bool,
        segments: &[&str],
    ) -> StateResult<Published> {
        let mut entries = self.entries();

        if !artifact_changed {
            if let Some(existing) = entries.get(identifier) {
                emit_blob_reused(identifier, existing.url());
                return Ok(Published {
                    url: existing.url().clone(),
                    outcome: PublishOutcome::Reused,
                });
            }
        }

        let parts = join_segments(segments);
        let bytes: usize = parts.iter().map(Vec::len).sum();
        let handle = self.allocator.create(parts, &self.media_type)?;
        let url = handle.url().clone();
        emit_blob_created(identifier, &url, bytes as u64);

        let outcome = match entries.insert(identifier.to_string(), handle) {
            Some(previous) => {
                self.release(identifier, previous);
                PublishOutcome::Replaced
            }
            None => PublishOutcome::Created,
        };

        Ok(Published { url, outcome })
    }

    /// URL currently published for `identifier`.
    pub fn current(&self, identifier: &str) -> Option<BlobUrl> {
        self.entries()
            .get(identifier)
            .map(|handle| handle.url().clone())
    }

    /// Revoke and drop the entry for `identifier`. Returns whether one existed.
    pub fn evict(&self, identifier: &str) -> bool {
        let removed = self.entries().remove(identifier);
        match removed {
            Some(handle) => {
                self.release(identifier, handle);
                true
            }
            None => false,
        }
    }

    /// Revoke every entry. Returns the number of revoked handles.
    pub fn clear(&self) -> usize {
        let drained: Vec<(String, ResourceHandle)> = self.entries().drain().collect();
        let count = drained.len();
        for (identifier, handle) in drained {
            self.release(&identifier, handle);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, identifier: &str, handle: ResourceHandle) {
        let url = handle.url().clone();
        if let Err(err) = self.allocator.revoke(handle) {
            panic!("resource handle lifecycle violation for {identifier} ({url}): {err}");
        }
        emit_blob_revoked(identifier, &url);
    }
}
