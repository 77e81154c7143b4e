//! Deltablob-State: Collaborator Contracts for Bundle Materialization
//!
//! This crate defines everything the materialization core consumes but does
//! not own: the per-bundle patcher state machine, the transport that fetches
//! change descriptions, and the allocator that hands out blob resources.
//!
//! ## Key Components
//!
//! - `Patcher` / `PatcherFactory`: artifact reconstruction per bundle lineage
//! - `Transport`: raw body retrieval for a locator
//! - `ResourceAllocator`: create/revoke of blob resources behind `ResourceHandle`
//! - `JsonDeltaPatcher`: default patcher for legacy and revision-based deltas

pub mod collaborator_traits;
mod delta_patcher;
mod error;
pub mod fakes;

pub use collaborator_traits::{
    BlobUrl, ContentDigest, Patcher, PatcherFactory, ProtocolMode, ResourceAllocator,
    ResourceHandle, StateResult, Transport, UpdateResult,
};
pub use delta_patcher::JsonDeltaPatcher;
pub use error::StateError;
