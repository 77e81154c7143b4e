//! The `materialize` operation: one fetch → apply → publish cycle.

use deltablob_state::{BlobUrl, Patcher, PatcherFactory, ResourceAllocator, Transport};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::cache::{PublishOutcome, ResourceCache};
use crate::config::MaterializerConfig;
use crate::error::{MaterializeError, Result};
use crate::metrics::CacheMetrics;
use crate::obs::{cycle_span, emit_cycle_failed, emit_cycle_finished, emit_cycle_started};
use crate::resolver::{fetch_suffix_for, PatcherRegistry};

/// What a caller gets back from a successful cycle.
///
/// `url` stays valid until the next cycle on the same identifier that
/// changes the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialized {
    pub url: BlobUrl,
    pub artifact_size: u64,
    pub outcome: PublishOutcome,
}

impl Materialized {
    pub fn reused(&self) -> bool {
        self.outcome == PublishOutcome::Reused
    }
}

/// Incremental bundle materialization cache.
///
/// Keeps one patcher lineage and at most one live blob per bundle
/// identifier. Cycles on the same identifier run one at a time; cycles on
/// different identifiers are independent.
pub struct Materializer<F, T, A>
where
    F: PatcherFactory,
    T: Transport,
    A: ResourceAllocator,
{
    registry: PatcherRegistry<F>,
    transport: T,
    cache: ResourceCache<A>,
    metrics: CacheMetrics,
}

impl<F, T, A> Materializer<F, T, A>
where
    F: PatcherFactory,
    T: Transport,
    A: ResourceAllocator,
{
    pub fn new(factory: F, transport: T, allocator: A, config: &MaterializerConfig) -> Self {
        Self {
            registry: PatcherRegistry::new(factory),
            transport,
            cache: ResourceCache::new(allocator, &config.media_type),
            metrics: CacheMetrics::new(),
        }
    }

    pub fn registry(&self) -> &PatcherRegistry<F> {
        &self.registry
    }

    pub fn cache(&self) -> &ResourceCache<A> {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Bring the blob for `identifier` up to date with the remote source.
    ///
    /// Transport and decoding failures are returned unchanged; they leave the
    /// patcher and the cache exactly as they were.
    pub async fn materialize(&self, identifier: &str) -> Result<Materialized> {
        self.metrics.inc_cycles();
        let result = self
            .run_cycle(identifier)
            .instrument(cycle_span(identifier))
            .await;

        match &result {
            Ok(materialized) => self.metrics.record_publish(materialized.outcome),
            Err(err) => {
                self.metrics.inc_failures();
                emit_cycle_failed(identifier, err);
            }
        }
        result
    }

    /// Run one cycle for each identifier concurrently.
    ///
    /// Results come back in input order.
    pub async fn materialize_all<S: AsRef<str>>(
        &self,
        identifiers: &[S],
    ) -> Vec<Result<Materialized>> {
        join_all(
            identifiers
                .iter()
                .map(|identifier| self.materialize(identifier.as_ref())),
        )
        .await
    }

    /// Revoke the blob published for `identifier`, if any.
    ///
    /// The patcher lineage is kept, so the next cycle fetches incrementally
    /// and republishes.
    pub async fn evict(&self, identifier: &str) -> bool {
        let Some(lineage) = self.registry.get(identifier) else {
            return false;
        };
        let mut lineage = lineage.lock().await;
        let evicted = self.cache.evict(identifier);
        if evicted {
            lineage.unpublished = true;
        }
        evicted
    }

    /// Revoke every published blob and flush metrics.
    ///
    /// Waits for in-flight cycles by taking every lineage lock before the
    /// cache is cleared. Cycles started afterwards publish into a fresh cache.
    pub async fn shutdown(&self) -> usize {
        let lineages = self.registry.lineages();
        let mut guards = Vec::with_capacity(lineages.len());
        for lineage in &lineages {
            guards.push(lineage.lock().await);
        }

        let revoked = self.cache.clear();
        for guard in guards.iter_mut() {
            guard.unpublished = true;
        }
        drop(guards);

        self.metrics.flush();
        revoked
    }

    async fn run_cycle(&self, identifier: &str) -> Result<Materialized> {
        let lineage = self.registry.resolve(identifier);
        let mut lineage = lineage.lock().await;

        let locator = format!(
            "{identifier}{}",
            fetch_suffix_for(&lineage.patcher, identifier)
        );
        emit_cycle_started(identifier, &locator);

        let body = self.transport.fetch(&locator).await?;
        let change: serde_json::Value = serde_json::from_slice(&body)?;
        let update = lineage.patcher.apply_update(change)?;

        let artifact_changed = update.artifact_changed() || lineage.unpublished;
        lineage.unpublished = artifact_changed;

        let segments = lineage.patcher.artifact_segments();
        let published = self
            .cache
            .publish(identifier, artifact_changed, &segments)
            .map_err(MaterializeError::Allocation)?;
        lineage.unpublished = false;

        emit_cycle_finished(
            identifier,
            &published.url,
            update.files_changed,
            update.total_size,
        );
        Ok(Materialized {
            url: published.url,
            artifact_size: update.total_size,
            outcome: published.outcome,
        })
    }
}
