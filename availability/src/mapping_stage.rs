//! First stage: resolves primary ids to secondary ids and forwards resolved
//! items to the existence stage.

use crate::batcher::{BatchPolicy, BatchProcessor, Batcher, FlushOutcome};
use crate::counter;
use crate::existence_stage::ExistenceStage;
use crate::id_map_cache::IdMapCache;
use crate::metrics_defs::BATCH_FAILED;
use crate::source::{FetchError, MappingSource};
use crate::types::{CheckStatus, LookupItem, PrimaryId, SecondaryId};
use crate::waiters::{Namespace, WaiterRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct MappingStage {
    batcher: Arc<Batcher<MappingProcessor>>,
}

impl MappingStage {
    pub fn new(
        policy: BatchPolicy,
        source: Arc<dyn MappingSource>,
        cache: Arc<IdMapCache>,
        registry: Arc<Mutex<WaiterRegistry>>,
        existence: ExistenceStage,
    ) -> Self {
        let processor = MappingProcessor {
            source,
            cache,
            registry,
            existence,
        };
        MappingStage {
            batcher: Batcher::new(Namespace::Mapping, policy, processor),
        }
    }

    /// Resolves the item's secondary id from the cache when known and hands
    /// it straight to the existence stage. Otherwise parks it until the batch
    /// holding its primary id completes.
    pub fn submit(&self, mut item: LookupItem) {
        let processor = self.batcher.processor();
        let Some(primary_id) = item.primary_id else {
            processor.existence.submit(item);
            return;
        };

        if let Some(secondary_id) = processor.cache.get(primary_id) {
            item.secondary_id = Some(secondary_id);
            processor.existence.submit(item);
            return;
        }

        let mut registry = processor.registry.lock();
        if registry.register(Namespace::Mapping, primary_id, item) {
            self.batcher.enqueue(primary_id);
        }
    }

    pub fn queued(&self) -> Vec<PrimaryId> {
        self.batcher.queued()
    }

    pub fn is_armed(&self) -> bool {
        self.batcher.is_armed()
    }
}

struct MappingProcessor {
    source: Arc<dyn MappingSource>,
    cache: Arc<IdMapCache>,
    registry: Arc<Mutex<WaiterRegistry>>,
    existence: ExistenceStage,
}

impl MappingProcessor {
    fn drain(&self, id: PrimaryId) -> Vec<LookupItem> {
        self.registry.lock().drain_all(Namespace::Mapping, id)
    }
}

#[async_trait]
impl BatchProcessor for MappingProcessor {
    async fn process(&self, batch: &[u64]) -> FlushOutcome {
        let mappings = match self.source.resolve(batch).await {
            Ok(mappings) => mappings,
            Err(FetchError::RateLimited) => return FlushOutcome::RateLimited,
            Err(err) => {
                counter!(BATCH_FAILED, "stage" => Namespace::Mapping.as_str()).increment(1);
                tracing::warn!(error = %err, size = batch.len(), "id mapping failed");
                for id in batch {
                    for item in self.drain(*id) {
                        item.deliver(CheckStatus::TransportError);
                    }
                }
                return FlushOutcome::Completed;
            }
        };

        let resolved: HashMap<PrimaryId, SecondaryId> = mappings
            .into_iter()
            .filter_map(|m| {
                m.secondary_id
                    .filter(|id| *id != 0)
                    .map(|secondary_id| (m.primary_id, secondary_id))
            })
            .collect();

        let pairs: Vec<(PrimaryId, SecondaryId)> = resolved.iter().map(|(p, s)| (*p, *s)).collect();
        self.cache.put_all(&pairs);

        tracing::debug!(
            requested = batch.len(),
            resolved = resolved.len(),
            "mapping batch done"
        );

        for id in batch {
            let items = self.drain(*id);
            match resolved.get(id) {
                Some(secondary_id) => {
                    for mut item in items {
                        item.secondary_id = Some(*secondary_id);
                        self.existence.submit(item);
                    }
                }
                None => {
                    for item in items {
                        item.deliver(CheckStatus::UnknownMapping);
                    }
                }
            }
        }
        FlushOutcome::Completed
    }
}
