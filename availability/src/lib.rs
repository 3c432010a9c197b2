//! Resolves page ids to catalog availability through two batched, cached
//! lookup stages.
//!
//! Page code calls [`AvailabilityChecker::submit_for_check`] with an AniList id.
//! The mapping stage turns it into a MAL id (from the id map cache or a bulk
//! AniList request), then the existence stage checks the MAL id (from the
//! status cache or a bulk catalog request) and invokes the callback.

pub mod anilist;
mod batcher;
pub mod catalog;
pub mod checker;
pub mod clock;
pub mod config;
pub mod existence_stage;
pub mod id_map_cache;
pub mod mapping_stage;
pub mod metrics_defs;
pub mod source;
pub mod status_cache;
pub mod store;
pub mod types;
pub mod waiters;

#[cfg(test)]
mod testutils;

pub use batcher::{BatchPolicy, MAX_BATCH_SIZE};
pub use checker::{AvailabilityChecker, CheckerError, Components, Settings};
pub use config::Config;
pub use types::{CheckStatus, PrimaryId, Resolution, SecondaryId};

use config::StoreType;
use std::sync::Arc;
use store::{FilesystemStore, MemoryStore, NoopStore, Store};

pub fn get_store(store_type: &StoreType) -> Arc<dyn Store> {
    match store_type {
        StoreType::Memory => Arc::new(MemoryStore::new()),
        StoreType::Filesystem { base_dir } => Arc::new(FilesystemStore::new(base_dir)),
        StoreType::Noop => {
            tracing::warn!("using the no-op store, results will not be cached");
            Arc::new(NoopStore)
        }
    }
}
