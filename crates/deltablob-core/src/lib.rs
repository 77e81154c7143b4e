//! Deltablob Core Library
//!
//! Incremental bundle materialization: fetch what changed since the last
//! cycle, fold it into the reconstructed bundle, and publish the result as a
//! single revocable blob per bundle identifier.

pub mod blob;
pub mod cache;
pub mod config;
pub mod error;
pub mod materializer;
pub mod metrics;
pub mod obs;
pub mod resolver;
pub mod telemetry;
pub mod transport;

pub use blob::{BlobMetadata, BlobRegistry, BLOB_URL_PREFIX};
pub use cache::{join_segments, PublishOutcome, Published, ResourceCache, SEGMENT_SEPARATOR};
pub use config::{HttpTransportConfig, MaterializerConfig, DEFAULT_MEDIA_TYPE};
pub use error::{MaterializeError, Result};
pub use materializer::{Materialized, Materializer};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use obs::cycle_span;
pub use resolver::{
    build_fetch_suffix, fetch_suffix_for, Lineage, PatcherRegistry, SharedLineage,
    LEGACY_MARKER_PARAM, REVISION_MARKER_PARAM,
};
pub use telemetry::init_tracing;
pub use transport::HttpTransport;

pub use deltablob_state::{
    BlobUrl, JsonDeltaPatcher, Patcher, PatcherFactory, ProtocolMode, ResourceAllocator,
    ResourceHandle, StateError, Transport, UpdateResult,
};

/// Deltablob version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
