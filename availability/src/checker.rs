use crate::anilist::AniListClient;
use crate::batcher::BatchPolicy;
use crate::catalog::CatalogClient;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ValidationError};
use crate::existence_stage::ExistenceStage;
use crate::get_store;
use crate::id_map_cache::IdMapCache;
use crate::mapping_stage::MappingStage;
use crate::source::{ExistenceSource, FetchError, MappingSource};
use crate::status_cache::{StatusCache, TtlPolicy};
use crate::store::Store;
use crate::types::{CheckStatus, LookupItem, PrimaryId, Resolution, SecondaryId};
use crate::waiters::WaiterRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(thiserror::Error, Debug)]
pub enum CheckerError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("source error: {0}")]
    Source(#[from] FetchError),
}

/// Tunables of the pipeline.
#[derive(Clone, Debug)]
pub struct Settings {
    pub mapping: BatchPolicy,
    pub existence: BatchPolicy,
    pub ttl: TtlPolicy,
    pub bot_url: String,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Settings {
            mapping: config.mapping_policy(),
            existence: config.existence_policy(),
            ttl: config.ttl_policy(),
            bot_url: config.bot_url.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from(&Config::default())
    }
}

/// External collaborators of the pipeline.
pub struct Components {
    pub mapping_source: Arc<dyn MappingSource>,
    pub existence_source: Arc<dyn ExistenceSource>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
}

struct CheckerInner {
    mapping: MappingStage,
    existence: ExistenceStage,
    registry: Arc<Mutex<WaiterRegistry>>,
    status_cache: Arc<StatusCache>,
    bot_url: String,
}

/// Entry point for page code. Each submission eventually invokes its callback
/// exactly once with the item's status. Lookups for the same id share one
/// request per stage, and results are cached in the store.
#[derive(Clone)]
pub struct AvailabilityChecker {
    inner: Arc<CheckerInner>,
}

impl AvailabilityChecker {
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: Settings, components: Components) -> Self {
        let registry = Arc::new(Mutex::new(WaiterRegistry::new()));
        let status_cache = Arc::new(StatusCache::new(
            components.store.clone(),
            components.clock,
            settings.ttl,
        ));
        let id_map = Arc::new(IdMapCache::new(components.store));

        let existence = ExistenceStage::new(
            settings.existence,
            components.existence_source,
            status_cache.clone(),
            registry.clone(),
        );
        let mapping = MappingStage::new(
            settings.mapping,
            components.mapping_source,
            id_map,
            registry.clone(),
            existence.clone(),
        );

        AvailabilityChecker {
            inner: Arc::new(CheckerInner {
                mapping,
                existence,
                registry,
                status_cache,
                bot_url: settings.bot_url,
            }),
        }
    }

    /// Builds the pipeline against the real endpoints described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, CheckerError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        let components = Components {
            mapping_source: Arc::new(AniListClient::new(client.clone(), &config.mapping.url)?),
            existence_source: Arc::new(CatalogClient::new(client, &config.existence.url)?),
            store: get_store(&config.store),
            clock: Arc::new(SystemClock),
        };

        Ok(Self::new(Settings::from(config), components))
    }

    /// Requests the status of the title with the given primary id. The
    /// callback may run before this returns when every answer is cached.
    pub fn submit_for_check<T, F>(&self, primary_id: PrimaryId, display_title: T, on_result: F)
    where
        T: Into<String>,
        F: FnOnce(Resolution) + Send + 'static,
    {
        self.inner
            .mapping
            .submit(LookupItem::new(primary_id, display_title, on_result));
    }

    /// Same as [`Self::submit_for_check`] for pages that already carry the
    /// secondary id. Skips the mapping stage.
    pub fn submit_secondary<T, F>(&self, secondary_id: SecondaryId, display_title: T, on_result: F)
    where
        T: Into<String>,
        F: FnOnce(Resolution) + Send + 'static,
    {
        self.inner
            .existence
            .submit(LookupItem::with_secondary(secondary_id, display_title, on_result));
    }

    pub async fn check<T: Into<String>>(&self, primary_id: PrimaryId, display_title: T) -> Resolution {
        let display_title = display_title.into();
        let (tx, rx) = oneshot::channel();
        self.submit_for_check(primary_id, display_title.clone(), move |resolution| {
            let _ = tx.send(resolution);
        });
        rx.await.unwrap_or_else(|_| Resolution {
            primary_id: Some(primary_id),
            secondary_id: None,
            display_title,
            status: CheckStatus::TransportError,
        })
    }

    pub async fn check_secondary<T: Into<String>>(
        &self,
        secondary_id: SecondaryId,
        display_title: T,
    ) -> Resolution {
        let display_title = display_title.into();
        let (tx, rx) = oneshot::channel();
        self.submit_secondary(secondary_id, display_title.clone(), move |resolution| {
            let _ = tx.send(resolution);
        });
        rx.await.unwrap_or_else(|_| Resolution {
            primary_id: None,
            secondary_id: Some(secondary_id),
            display_title,
            status: CheckStatus::TransportError,
        })
    }

    pub fn bot_url(&self, resolution: &Resolution) -> String {
        resolution.bot_url(&self.inner.bot_url)
    }

    /// Status of `secondary_id` from the cache alone, without any request.
    pub fn cached_status(&self, secondary_id: SecondaryId) -> Option<CheckStatus> {
        self.inner
            .status_cache
            .get(secondary_id)
            .map(CheckStatus::from_exists)
    }

    /// Number of ids with waiters parked in either stage.
    pub fn pending(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        !self.inner.mapping.is_armed() && !self.inner.existence.is_armed()
    }
}
