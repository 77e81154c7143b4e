//! Collaborator trait definitions for deltablob
//!
//! The materialization core never reconstructs artifacts, talks to the
//! network or owns memory for blobs itself. It drives three collaborators:
//! - `Patcher`: per-bundle state machine folding change descriptions
//! - `Transport`: fetches the raw body of a change description
//! - `ResourceAllocator`: creates and revokes consumable blob resources
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StateError;

/// Result type for collaborator operations
pub type StateResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// Patcher: per-bundle artifact state machine
// ---------------------------------------------------------------------------

/// Wire protocol spoken by the remote source for one bundle lineage.
///
/// `Unknown` until the first change description has been applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolMode {
    #[default]
    Unknown,
    /// Bundle-id based deltas, queried with `deltaBundleId`
    Legacy,
    /// Revision based deltas, queried with `revisionId`
    RevisionBased,
}

impl std::fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolMode::Unknown => "unknown",
            ProtocolMode::Legacy => "legacy",
            ProtocolMode::RevisionBased => "revision",
        };
        f.write_str(name)
    }
}

/// Outcome of folding one change description into the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Segments added, modified or removed by this update
    pub files_changed: usize,
    /// Size in bytes of the whole artifact after the update
    pub total_size: u64,
}

impl UpdateResult {
    pub fn artifact_changed(&self) -> bool {
        self.files_changed > 0
    }
}

/// Artifact state machine for a single bundle lineage.
///
/// Guarantees:
/// - `apply_update` is atomic: on error the state is exactly as before.
/// - `artifact_segments` reflects the last fully applied update and may be
///   called any number of times.
pub trait Patcher: Send + 'static {
    /// Protocol determined by the first applied update.
    fn protocol_mode(&self) -> ProtocolMode;

    /// Bundle id (legacy) or revision id of the last applied update.
    fn last_applied_marker(&self) -> Option<&str>;

    /// Fold a decoded change description into the artifact.
    fn apply_update(&mut self, body: serde_json::Value) -> StateResult<UpdateResult>;

    /// Ordered segments making up the current artifact.
    fn artifact_segments(&self) -> Vec<&str>;
}

/// Creates the patcher for a bundle identifier on first use.
pub trait PatcherFactory: Send + Sync {
    type Patcher: Patcher;

    fn create(&self, identifier: &str) -> Self::Patcher;
}

impl<F, P> PatcherFactory for F
where
    F: Fn(&str) -> P + Send + Sync,
    P: Patcher,
{
    type Patcher = P;

    fn create(&self, identifier: &str) -> P {
        self(identifier)
    }
}

// ---------------------------------------------------------------------------
// Transport: change description retrieval
// ---------------------------------------------------------------------------

/// Fetches the raw body behind a locator.
///
/// Network failures and non-success statuses must be reported as
/// `StateError::Transport` or `StateError::HttpStatus`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, locator: &str) -> StateResult<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, locator: &str) -> StateResult<Vec<u8>> {
        (**self).fetch(locator).await
    }
}

// ---------------------------------------------------------------------------
// ResourceAllocator: blob handles
// ---------------------------------------------------------------------------

/// Public address of a materialized blob.
///
/// This is the view handed to callers; it does not confer ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobUrl(String);

impl BlobUrl {
    pub fn new(url: impl Into<String>) -> Self {
        BlobUrl(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owning token for a live blob resource.
///
/// Deliberately not `Clone`: exactly one owner exists from `create` until the
/// token is consumed by `revoke`.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    url: BlobUrl,
}

impl ResourceHandle {
    /// Mint a handle. Only allocators should call this.
    pub fn new(url: BlobUrl) -> Self {
        ResourceHandle { url }
    }

    pub fn url(&self) -> &BlobUrl {
        &self.url
    }
}

/// Runtime allocator for consumable blob resources.
///
/// Guarantees:
/// - `create` returns a handle whose URL is unique for the allocator lifetime.
/// - `revoke` releases the resource; revoking a handle the allocator does not
///   know about returns `StateError::UnknownHandle`.
pub trait ResourceAllocator: Send + Sync {
    /// Materialize `parts`, concatenated in order, as one blob.
    fn create(&self, parts: Vec<Vec<u8>>, media_type: &str) -> StateResult<ResourceHandle>;

    /// Release the resource behind `handle`.
    fn revoke(&self, handle: ResourceHandle) -> StateResult<()>;
}

impl<A: ResourceAllocator + ?Sized> ResourceAllocator for Arc<A> {
    fn create(&self, parts: Vec<Vec<u8>>, media_type: &str) -> StateResult<ResourceHandle> {
        (**self).create(parts, media_type)
    }

    fn revoke(&self, handle: ResourceHandle) -> StateResult<()> {
        (**self).revoke(handle)
    }
}

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string) of a materialized blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest over `parts` as if they were concatenated.
    pub fn from_parts(parts: &[Vec<u8>]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_over_parts_matches_concatenation() {
        let split = ContentDigest::from_parts(&[b"a\n".to_vec(), b"b\n".to_vec()]);
        let joined = ContentDigest::from_parts(&[b"a\nb\n".to_vec()]);
        assert_eq!(split, joined);
        assert_eq!(split.as_str().len(), 64);
        assert_eq!(split.short().len(), 12);
    }

    #[test]
    fn update_result_changed_flag() {
        let idle = UpdateResult {
            files_changed: 0,
            total_size: 10,
        };
        assert!(!idle.artifact_changed());

        let busy = UpdateResult {
            files_changed: 2,
            total_size: 10,
        };
        assert!(busy.artifact_changed());
    }

    #[test]
    fn protocol_mode_defaults_to_unknown() {
        assert_eq!(ProtocolMode::default(), ProtocolMode::Unknown);
        assert_eq!(ProtocolMode::RevisionBased.to_string(), "revision");
    }
}
