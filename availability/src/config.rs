use crate::anilist::DEFAULT_ANILIST_URL;
use crate::batcher::{BatchPolicy, MAX_BATCH_SIZE};
use crate::catalog::DEFAULT_CATALOG_URL;
use crate::status_cache::TtlPolicy;
use crate::types::DEFAULT_BOT_URL;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("{stage}: batch size must be between 1 and {max}, got {size}", max = MAX_BATCH_SIZE)]
    InvalidBatchSize { stage: &'static str, size: usize },

    #[error("{stage}: batch interval cannot be 0")]
    ZeroInterval { stage: &'static str },

    #[error("{stage}: rate limit backoff cannot be 0")]
    ZeroBackoff { stage: &'static str },

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("found TTL ({found}s) must be longer than missing TTL ({missing}s)")]
    TtlOrder { found: u64, missing: u64 },

    #[error("HTTP timeout cannot be 0")]
    ZeroTimeout,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Memory,
    Filesystem { base_dir: String },
    Noop,
}

/// Results persist between runs unless configured otherwise.
impl Default for StoreType {
    fn default() -> Self {
        StoreType::Filesystem {
            base_dir: default_store_dir(),
        }
    }
}

/// `<user cache dir>/akayuki`, or `.akayuki` in the working directory when the
/// platform has no cache dir.
pub fn default_store_dir() -> String {
    dirs::cache_dir()
        .map(|dir| dir.join("akayuki").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".akayuki".into())
}

/// Mapping endpoint and the batching of primary id lookups.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    pub url: String,
    pub batch_interval_ms: u64,
    pub backoff_ms: u64,
    pub batch_size: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig {
            url: DEFAULT_ANILIST_URL.into(),
            batch_interval_ms: 2000,
            backoff_ms: 10_000,
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// Catalog endpoint and the batching of existence checks.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct ExistenceConfig {
    pub url: String,
    pub batch_interval_ms: u64,
    pub backoff_ms: u64,
    pub batch_size: usize,
}

impl Default for ExistenceConfig {
    fn default() -> Self {
        ExistenceConfig {
            url: DEFAULT_CATALOG_URL.into(),
            batch_interval_ms: 1100,
            backoff_ms: 5000,
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_found_secs: u64,
    pub ttl_missing_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl = TtlPolicy::default();
        CacheConfig {
            ttl_found_secs: ttl.found.as_secs(),
            ttl_missing_secs: ttl.missing.as_secs(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mapping: MappingConfig,
    pub existence: ExistenceConfig,
    pub cache: CacheConfig,
    pub store: StoreType,
    pub http_timeout_secs: u64,
    pub bot_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mapping: MappingConfig::default(),
            existence: ExistenceConfig::default(),
            cache: CacheConfig::default(),
            store: StoreType::default(),
            http_timeout_secs: 30,
            bot_url: DEFAULT_BOT_URL.into(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_stage(
            "mapping",
            &self.mapping.url,
            self.mapping.batch_interval_ms,
            self.mapping.backoff_ms,
            self.mapping.batch_size,
        )?;
        validate_stage(
            "existence",
            &self.existence.url,
            self.existence.batch_interval_ms,
            self.existence.backoff_ms,
            self.existence.batch_size,
        )?;

        if self.cache.ttl_found_secs <= self.cache.ttl_missing_secs {
            return Err(ValidationError::TtlOrder {
                found: self.cache.ttl_found_secs,
                missing: self.cache.ttl_missing_secs,
            });
        }

        if self.http_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        Ok(())
    }

    pub fn mapping_policy(&self) -> BatchPolicy {
        BatchPolicy {
            interval: Duration::from_millis(self.mapping.batch_interval_ms),
            backoff: Duration::from_millis(self.mapping.backoff_ms),
            max_batch_size: self.mapping.batch_size,
        }
    }

    pub fn existence_policy(&self) -> BatchPolicy {
        BatchPolicy {
            interval: Duration::from_millis(self.existence.batch_interval_ms),
            backoff: Duration::from_millis(self.existence.backoff_ms),
            max_batch_size: self.existence.batch_size,
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            found: Duration::from_secs(self.cache.ttl_found_secs),
            missing: Duration::from_secs(self.cache.ttl_missing_secs),
        }
    }
}

fn validate_stage(
    stage: &'static str,
    url: &str,
    interval_ms: u64,
    backoff_ms: u64,
    batch_size: usize,
) -> Result<(), ValidationError> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(ValidationError::InvalidBatchSize {
            stage,
            size: batch_size,
        });
    }
    if interval_ms == 0 {
        return Err(ValidationError::ZeroInterval { stage });
    }
    if backoff_ms == 0 {
        return Err(ValidationError::ZeroBackoff { stage });
    }
    Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        config.validate().unwrap();

        let mapping = config.mapping_policy();
        assert_eq!(mapping.interval, Duration::from_millis(2000));
        assert_eq!(mapping.backoff, Duration::from_secs(10));
        assert_eq!(mapping.max_batch_size, 50);

        let existence = config.existence_policy();
        assert_eq!(existence.interval, Duration::from_millis(1100));
        assert_eq!(existence.backoff, Duration::from_secs(5));

        assert_eq!(config.ttl_policy(), TtlPolicy::default());
        assert_eq!(
            config.store,
            StoreType::Filesystem {
                base_dir: default_store_dir()
            }
        );
        assert!(default_store_dir().ends_with("akayuki"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.mapping.batch_size = 51;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidBatchSize {
                stage: "mapping",
                size: 51
            })
        );

        let mut config = Config::default();
        config.existence.batch_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroInterval { stage: "existence" })
        );

        let mut config = Config::default();
        config.mapping.backoff_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroBackoff { stage: "mapping" })
        );

        let mut config = Config::default();
        config.cache.ttl_missing_secs = config.cache.ttl_found_secs;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::TtlOrder { .. })
        ));

        let mut config = Config::default();
        config.existence.url = "akayukidl.top".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidUrl { .. })
        ));
    }
}
