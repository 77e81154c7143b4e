//! Error types for deltablob-state

use thiserror::Error;

/// Errors reported by the collaborators of the materialization core
#[derive(Error, Debug)]
pub enum StateError {
    /// Network-level fetch failure
    #[error("Transport failed for {locator}: {reason}")]
    Transport { locator: String, reason: String },

    /// Remote source answered with a non-success status
    #[error("Unexpected HTTP status {status} for {locator}")]
    HttpStatus { locator: String, status: u16 },

    /// Body is not a well-formed change description
    #[error("Malformed change description: {0}")]
    Decoding(String),

    /// The remote source switched delta formats mid-lineage
    #[error("Delta format changed: lineage is {expected}, update is {actual}")]
    FormatChanged { expected: String, actual: String },

    /// An incremental revision arrived before any base revision
    #[error("Received an incremental revision before a base revision")]
    MissingBase,

    /// Revocation of a handle the allocator does not know about
    #[error("Unknown resource handle: {url}")]
    UnknownHandle { url: String },

    /// The allocator refused to materialize a resource
    #[error("Resource allocation failed: {0}")]
    Allocation(String),
}

impl StateError {
    /// Whether this error originates from fetching, as opposed to decoding
    /// or applying the fetched body.
    pub fn is_transport(&self) -> bool {
        matches!(self, StateError::Transport { .. } | StateError::HttpStatus { .. })
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Decoding(err.to_string())
    }
}
