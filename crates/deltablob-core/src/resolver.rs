//! Identifier resolution: one patcher per bundle lineage, and the query
//! suffix asking that lineage's server for the next incremental step.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use deltablob_state::{Patcher, PatcherFactory, ProtocolMode};

use crate::obs::emit_patcher_created;

/// Query parameter carrying the last bundle id on the legacy protocol.
pub const LEGACY_MARKER_PARAM: &str = "deltaBundleId";

/// Query parameter carrying the last revision id on the revision protocol.
pub const REVISION_MARKER_PARAM: &str = "revisionId";

/// A bundle lineage: its patcher plus publish bookkeeping.
pub struct Lineage<P> {
    pub patcher: P,
    /// An applied change has not reached the cache yet.
    pub(crate) unpublished: bool,
}

impl<P> Lineage<P> {
    fn new(patcher: P) -> Self {
        Self {
            patcher,
            unpublished: false,
        }
    }
}

/// Lineage shared between the registry and the cycle currently driving it.
///
/// The async mutex is held for a whole cycle, which serializes cycles per
/// identifier.
pub type SharedLineage<P> = Arc<tokio::sync::Mutex<Lineage<P>>>;

/// Compute the suffix to append to `identifier` for the next fetch.
///
/// An `Unknown` mode always yields an empty suffix so the first fetch is a
/// full, unqualified request. Otherwise the suffix is empty until a marker
/// exists. The separator is `&` if `identifier` already carries a query
/// string, `?` otherwise.
pub fn build_fetch_suffix(mode: ProtocolMode, marker: Option<&str>, identifier: &str) -> String {
    let param = match mode {
        ProtocolMode::Unknown => return String::new(),
        ProtocolMode::Legacy => LEGACY_MARKER_PARAM,
        ProtocolMode::RevisionBased => REVISION_MARKER_PARAM,
    };

    match marker {
        Some(marker) if !marker.is_empty() => {
            let separator = if identifier.contains('?') { '&' } else { '?' };
            format!("{separator}{param}={marker}")
        }
        _ => String::new(),
    }
}

/// [`build_fetch_suffix`] for the current state of `patcher`.
pub fn fetch_suffix_for<P: Patcher + ?Sized>(patcher: &P, identifier: &str) -> String {
    build_fetch_suffix(
        patcher.protocol_mode(),
        patcher.last_applied_marker(),
        identifier,
    )
}

/// Registry of bundle lineages keyed by identifier.
pub struct PatcherRegistry<F: PatcherFactory> {
    factory: F,
    patchers: Mutex<HashMap<String, SharedLineage<F::Patcher>>>,
}

impl<F: PatcherFactory> PatcherRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            patchers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the lineage for `identifier`, creating its patcher on first use.
    pub fn resolve(&self, identifier: &str) -> SharedLineage<F::Patcher> {
        let mut patchers = self.patchers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = patchers.get(identifier) {
            return Arc::clone(existing);
        }

        let patcher = self.factory.create(identifier);
        let created = Arc::new(tokio::sync::Mutex::new(Lineage::new(patcher)));
        patchers.insert(identifier.to_string(), Arc::clone(&created));
        emit_patcher_created(identifier);
        created
    }

    /// Return the lineage for `identifier` if one was ever resolved.
    pub fn get(&self, identifier: &str) -> Option<SharedLineage<F::Patcher>> {
        self.patchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .map(Arc::clone)
    }

    /// Snapshot of every lineage.
    pub fn lineages(&self) -> Vec<SharedLineage<F::Patcher>> {
        self.patchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.patchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.patchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
