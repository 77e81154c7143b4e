//! Error taxonomy for a materialization cycle.

use deltablob_state::StateError;

/// Errors surfaced by `Materializer::materialize`.
///
/// Every variant means the cycle aborted before the cache was touched: the
/// previously published blob, if any, is still valid.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("transport error: {0}")]
    Transport(#[source] StateError),

    #[error("decoding error: {0}")]
    Decoding(#[source] StateError),

    /// The allocator refused the new blob. The artifact change is kept and
    /// published by the next successful cycle.
    #[error("allocation error: {0}")]
    Allocation(#[source] StateError),
}

impl MaterializeError {
    pub fn is_transport(&self) -> bool {
        matches!(self, MaterializeError::Transport(_))
    }
}

impl From<StateError> for MaterializeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Allocation(_) => MaterializeError::Allocation(err),
            _ if err.is_transport() => MaterializeError::Transport(err),
            _ => MaterializeError::Decoding(err),
        }
    }
}

impl From<serde_json::Error> for MaterializeError {
    fn from(err: serde_json::Error) -> Self {
        MaterializeError::Decoding(err.into())
    }
}

/// Result type for materialization.
pub type Result<T> = std::result::Result<T, MaterializeError>;
