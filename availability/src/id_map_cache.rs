//! Primary to secondary id mappings. Secondary ids never change once assigned
//! upstream, so entries do not expire.

use crate::counter;
use crate::metrics_defs::{ID_MAP_CACHE_HIT, ID_MAP_CACHE_MISS, STORE_WRITE_FAILED};
use crate::store::Store;
use crate::types::{PrimaryId, SecondaryId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const ID_MAP_CACHE_KEY: &str = "akayuki_id_map_cache_v3";

type MappingMap = HashMap<PrimaryId, SecondaryId>;

pub struct IdMapCache {
    store: Arc<dyn Store>,
    write_lock: Mutex<()>,
}

impl IdMapCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        IdMapCache {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, primary_id: PrimaryId) -> Option<SecondaryId> {
        let secondary_id = self.load().get(&primary_id).copied();
        let metric_def = if secondary_id.is_some() {
            ID_MAP_CACHE_HIT
        } else {
            ID_MAP_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        secondary_id
    }

    pub fn put(&self, primary_id: PrimaryId, secondary_id: SecondaryId) {
        self.put_all(&[(primary_id, secondary_id)]);
    }

    /// Writes several mappings with a single store round trip.
    pub fn put_all(&self, mappings: &[(PrimaryId, SecondaryId)]) {
        if mappings.is_empty() {
            return;
        }
        let _guard = self.write_lock.lock();
        let mut entries = self.load();
        entries.extend(mappings.iter().copied());

        let result = serde_json::to_string(&entries)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                self.store
                    .save(ID_MAP_CACHE_KEY, &raw)
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = result {
            counter!(STORE_WRITE_FAILED).increment(1);
            tracing::warn!(error = %err, "failed to persist id mappings");
        }
    }

    fn load(&self) -> MappingMap {
        match self.store.load(ID_MAP_CACHE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding unreadable id mapping cache");
                MappingMap::new()
            }),
            Ok(None) => MappingMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, "id mapping cache unavailable");
                MappingMap::new()
            }
        }
    }
}
