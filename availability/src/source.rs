use crate::types::{PrimaryId, SecondaryId};
use async_trait::async_trait;
use http::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("unexpected status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("HTTP client error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

/// One entry of a mapping response. `secondary_id` is `None` when upstream
/// knows the title but has no secondary id for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdMapping {
    pub primary_id: PrimaryId,
    pub secondary_id: Option<SecondaryId>,
}

/// Bulk primary to secondary id resolution. Ids missing from the result have
/// no mapping.
#[async_trait]
pub trait MappingSource: Send + Sync {
    async fn resolve(&self, ids: &[PrimaryId]) -> Result<Vec<IdMapping>, FetchError>;
}

/// Bulk existence check. Returns the subset of `ids` the catalog holds.
#[async_trait]
pub trait ExistenceSource: Send + Sync {
    async fn check(&self, ids: &[SecondaryId]) -> Result<Vec<SecondaryId>, FetchError>;
}
