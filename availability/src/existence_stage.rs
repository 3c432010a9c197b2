//! Second stage: checks secondary ids against the catalog.

use crate::batcher::{BatchPolicy, BatchProcessor, Batcher, FlushOutcome};
use crate::counter;
use crate::metrics_defs::BATCH_FAILED;
use crate::source::{ExistenceSource, FetchError};
use crate::status_cache::StatusCache;
use crate::types::{CheckStatus, LookupItem, SecondaryId};
use crate::waiters::{Namespace, WaiterRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct ExistenceStage {
    batcher: Arc<Batcher<ExistenceProcessor>>,
}

impl ExistenceStage {
    pub fn new(
        policy: BatchPolicy,
        source: Arc<dyn ExistenceSource>,
        cache: Arc<StatusCache>,
        registry: Arc<Mutex<WaiterRegistry>>,
    ) -> Self {
        let processor = ExistenceProcessor {
            source,
            cache,
            registry,
        };
        ExistenceStage {
            batcher: Batcher::new(Namespace::Existence, policy, processor),
        }
    }

    /// Delivers from the cache when possible, otherwise parks the item until
    /// the batch holding its secondary id completes.
    pub fn submit(&self, item: LookupItem) {
        let secondary_id = match item.secondary_id {
            Some(id) if id != 0 => id,
            _ => {
                tracing::warn!(?item, "existence check without a secondary id");
                item.deliver(CheckStatus::UnknownMapping);
                return;
            }
        };

        let processor = self.batcher.processor();
        if let Some(exists) = processor.cache.get(secondary_id) {
            item.deliver(CheckStatus::from_exists(exists));
            return;
        }

        let mut registry = processor.registry.lock();
        if registry.register(Namespace::Existence, secondary_id, item) {
            self.batcher.enqueue(secondary_id);
        }
    }

    pub fn queued(&self) -> Vec<SecondaryId> {
        self.batcher.queued()
    }

    pub fn is_armed(&self) -> bool {
        self.batcher.is_armed()
    }
}

struct ExistenceProcessor {
    source: Arc<dyn ExistenceSource>,
    cache: Arc<StatusCache>,
    registry: Arc<Mutex<WaiterRegistry>>,
}

impl ExistenceProcessor {
    fn deliver(&self, id: SecondaryId, status: CheckStatus) {
        let items = self.registry.lock().drain_all(Namespace::Existence, id);
        for item in items {
            item.deliver(status);
        }
    }
}

#[async_trait]
impl BatchProcessor for ExistenceProcessor {
    async fn process(&self, batch: &[u64]) -> FlushOutcome {
        let existing: HashSet<SecondaryId> = match self.source.check(batch).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(FetchError::RateLimited) => return FlushOutcome::RateLimited,
            Err(err) => {
                counter!(BATCH_FAILED, "stage" => Namespace::Existence.as_str()).increment(1);
                tracing::warn!(error = %err, size = batch.len(), "existence check failed");
                // Errors are not cached, the next submission for these ids retries.
                for id in batch {
                    self.deliver(*id, CheckStatus::TransportError);
                }
                return FlushOutcome::Completed;
            }
        };

        let (found, missing): (Vec<SecondaryId>, Vec<SecondaryId>) =
            batch.iter().copied().partition(|id| existing.contains(id));
        self.cache.put(&found, true);
        self.cache.put(&missing, false);

        tracing::debug!(found = found.len(), missing = missing.len(), "existence batch done");

        for id in batch {
            self.deliver(*id, CheckStatus::from_exists(existing.contains(id)));
        }
        FlushOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::status_cache::TtlPolicy;
    use crate::store::MemoryStore;
    use crate::testutils::{FakeExistenceSource, Reply, Results};
    use std::time::Duration;

    fn policy() -> BatchPolicy {
        BatchPolicy {
            interval: Duration::from_millis(1100),
            backoff: Duration::from_secs(5),
            max_batch_size: 50,
        }
    }

    fn stage(source: Arc<FakeExistenceSource>) -> (ExistenceStage, Arc<StatusCache>) {
        let cache = Arc::new(StatusCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
            TtlPolicy::default(),
        ));
        let registry = Arc::new(Mutex::new(WaiterRegistry::new()));
        (
            ExistenceStage::new(policy(), source, cache.clone(), registry),
            cache,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secondary_id() {
        let source = Arc::new(FakeExistenceSource::new([]));
        let (stage, _cache) = stage(source.clone());
        let results = Results::new();

        let mut item = LookupItem::new(21, "no mapping", results.waiter());
        item.secondary_id = None;
        stage.submit(item);

        assert_eq!(results.statuses(), vec![CheckStatus::UnknownMapping]);
        assert!(!stage.is_armed());
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_queue() {
        let source = Arc::new(FakeExistenceSource::new([]));
        let (stage, cache) = stage(source.clone());
        cache.put(&[1535], true);

        let results = Results::new();
        stage.submit(LookupItem::with_secondary(1535, "bebop", results.waiter()));

        assert_eq!(results.statuses(), vec![CheckStatus::Exists]);
        assert!(stage.queued().is_empty());
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_not_cached() {
        let source = Arc::new(FakeExistenceSource::new([1]));
        source.script(Reply::Fail);
        let (stage, cache) = stage(source.clone());
        let results = Results::new();

        stage.submit(LookupItem::with_secondary(1, "a", results.waiter()));
        stage.submit(LookupItem::with_secondary(2, "b", results.waiter()));
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert_eq!(
            results.statuses(),
            vec![CheckStatus::TransportError, CheckStatus::TransportError]
        );
        assert_eq!(cache.entry(1), None);
        assert_eq!(cache.entry(2), None);

        // A later submission goes back to the network
        stage.submit(LookupItem::with_secondary(1, "a", results.waiter()));
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(source.calls(), vec![vec![1, 2], vec![1]]);
        assert_eq!(results.statuses().last(), Some(&CheckStatus::Exists));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_batch_retried_without_cache_writes() {
        let source = Arc::new(FakeExistenceSource::new([3, 7]));
        source.script(Reply::RateLimited);
        let (stage, cache) = stage(source.clone());
        let results = Results::new();

        let ids: Vec<u64> = (1..=10).collect();
        for id in &ids {
            stage.submit(LookupItem::with_secondary(*id, "t", results.waiter()));
        }

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(source.calls(), vec![ids.clone()]);
        assert!(results.statuses().is_empty());
        for id in &ids {
            assert_eq!(cache.entry(*id), None);
        }

        // Arrives during the backoff, lands behind the requeued batch
        stage.submit(LookupItem::with_secondary(11, "t", results.waiter()));
        let mut expected = ids.clone();
        expected.push(11);
        assert_eq!(stage.queued(), expected);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls().len(), 2);
        assert_eq!(source.calls()[1], expected);
        assert_eq!(results.statuses().len(), 11);
        assert_eq!(cache.entry(3).map(|e| e.value), Some(true));
        assert_eq!(cache.entry(4).map(|e| e.value), Some(false));
    }
}
