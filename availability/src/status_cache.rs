//! Expiring cache of existence results keyed by secondary id. Positive results
//! are kept far longer than negative ones so titles added to the catalog show up
//! after a short delay while confirmed titles are not rechecked for days.

use crate::clock::Clock;
use crate::metrics_defs::{STATUS_CACHE_EXPIRED, STATUS_CACHE_HIT, STATUS_CACHE_MISS, STORE_WRITE_FAILED};
use crate::store::Store;
use crate::types::SecondaryId;
use crate::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const STATUS_CACHE_KEY: &str = "akayuki_status_cache_v5";

const TTL_FOUND_SECS: u64 = 7 * 24 * 60 * 60;
const TTL_MISSING_SECS: u64 = 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TtlPolicy {
    pub found: Duration,
    pub missing: Duration,
}

impl TtlPolicy {
    pub fn for_value(&self, exists: bool) -> Duration {
        if exists { self.found } else { self.missing }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy {
            found: Duration::from_secs(TTL_FOUND_SECS),
            missing: Duration::from_secs(TTL_MISSING_SECS),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "v")]
    pub value: bool,
    /// Milliseconds since the unix epoch.
    #[serde(rename = "e")]
    pub expires_at: u64,
}

type EntryMap = HashMap<SecondaryId, CacheEntry>;

pub struct StatusCache {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl: TtlPolicy,
    // Held from load to save so read-modify-write cycles never interleave.
    write_lock: Mutex<()>,
}

impl StatusCache {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttl: TtlPolicy) -> Self {
        StatusCache {
            store,
            clock,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> TtlPolicy {
        self.ttl
    }

    /// Returns the cached existence for `id`. An expired entry is removed and
    /// reported as absent.
    pub fn get(&self, id: SecondaryId) -> Option<bool> {
        let _guard = self.write_lock.lock();
        let mut entries = self.load();
        let result = match entries.get(&id) {
            None => None,
            Some(entry) if self.clock.now_millis() > entry.expires_at => {
                entries.remove(&id);
                self.save(&entries);
                counter!(STATUS_CACHE_EXPIRED).increment(1);
                None
            }
            Some(entry) => Some(entry.value),
        };

        let metric_def = if result.is_some() {
            STATUS_CACHE_HIT
        } else {
            STATUS_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        result
    }

    /// Raw entry, without expiry handling.
    pub fn entry(&self, id: SecondaryId) -> Option<CacheEntry> {
        let _guard = self.write_lock.lock();
        self.load().get(&id).copied()
    }

    pub fn put(&self, ids: &[SecondaryId], exists: bool) {
        if ids.is_empty() {
            return;
        }

        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(self.ttl.for_value(exists).as_millis() as u64);

        let _guard = self.write_lock.lock();
        let mut entries = self.load();
        for id in ids {
            entries.insert(
                *id,
                CacheEntry {
                    value: exists,
                    expires_at,
                },
            );
        }
        self.save(&entries);
    }

    fn load(&self) -> EntryMap {
        match self.store.load(STATUS_CACHE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "discarding unreadable status cache");
                EntryMap::new()
            }),
            Ok(None) => EntryMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, "status cache unavailable");
                EntryMap::new()
            }
        }
    }

    fn save(&self, entries: &EntryMap) {
        let result = serde_json::to_string(entries)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                self.store
                    .save(STATUS_CACHE_KEY, &raw)
                    .map_err(|err| err.to_string())
            });

        if let Err(err) = result {
            counter!(STORE_WRITE_FAILED).increment(1);
            tracing::warn!(error = %err, "failed to persist status cache");
        }
    }
}
