//! Structured observability hooks for materialization cycles.
//!
//! This module provides:
//! - A cycle-scoped tracing span, attached with `tracing::Instrument`
//! - Emission functions for cycle and blob lifecycle events
//!
//! Events are emitted at `info!`/`debug!` level (filter with `RUST_LOG`).

use deltablob_state::BlobUrl;
use tracing::{debug, info, warn};

/// Span tagging everything inside a cycle with its bundle identifier.
pub fn cycle_span(bundle: &str) -> tracing::Span {
    tracing::info_span!("deltablob.cycle", bundle = %bundle)
}

/// Emit event: a cycle is about to fetch `locator`.
pub fn emit_cycle_started(bundle: &str, locator: &str) {
    debug!(event = "cycle.started", bundle = %bundle, locator = %locator);
}

/// Emit event: cycle completed and published `url`.
pub fn emit_cycle_finished(bundle: &str, url: &BlobUrl, files_changed: usize, artifact_size: u64) {
    info!(
        event = "cycle.finished",
        bundle = %bundle,
        url = %url,
        files_changed = files_changed,
        artifact_size = artifact_size,
    );
}

/// Emit event: cycle aborted before publishing (warning level).
pub fn emit_cycle_failed(bundle: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cycle.failed", bundle = %bundle, error = %error);
}

/// Emit event: first use of a bundle identifier.
pub fn emit_patcher_created(bundle: &str) {
    debug!(event = "patcher.created", bundle = %bundle);
}

pub fn emit_blob_reused(bundle: &str, url: &BlobUrl) {
    debug!(event = "blob.reused", bundle = %bundle, url = %url);
}

pub fn emit_blob_created(bundle: &str, url: &BlobUrl, bytes: u64) {
    debug!(event = "blob.created", bundle = %bundle, url = %url, bytes = bytes);
}

pub fn emit_blob_revoked(bundle: &str, url: &BlobUrl) {
    debug!(event = "blob.revoked", bundle = %bundle, url = %url);
}
