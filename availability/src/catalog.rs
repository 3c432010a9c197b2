//! Existence source backed by the catalog's bulk `/check` endpoint.

use crate::source::{ExistenceSource, FetchError};
use crate::types::SecondaryId;
use async_trait::async_trait;
use http::StatusCode;
use reqwest::Url;
use serde::Deserialize;

pub const DEFAULT_CATALOG_URL: &str = "https://akayukidl.top/api/animes";

#[derive(Deserialize)]
struct CheckResponse {
    #[serde(default)]
    existing_ids: Vec<SecondaryId>,
}

pub struct CatalogClient {
    client: reqwest::Client,
    check_url: Url,
}

impl CatalogClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        let check_url = format!("{}/check", base_url.trim_end_matches('/'));
        let check_url =
            Url::parse(&check_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        Ok(CatalogClient { client, check_url })
    }
}

#[async_trait]
impl ExistenceSource for CatalogClient {
    async fn check(&self, ids: &[SecondaryId]) -> Result<Vec<SecondaryId>, FetchError> {
        let response = self
            .client
            .post(self.check_url.clone())
            .json(ids)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<CheckResponse>().await?.existing_ids),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            status => Err(FetchError::UnexpectedStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::spawn_mock_server;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    async fn check(Json(ids): Json<Vec<u64>>) -> Json<Value> {
        let existing: Vec<u64> = ids.into_iter().filter(|id| id % 2 == 0).collect();
        Json(json!({ "existing_ids": existing }))
    }

    #[tokio::test]
    async fn test_check() {
        let router = Router::new().route("/api/animes/check", post(check));
        let url = spawn_mock_server(router).await;
        let client = CatalogClient::new(reqwest::Client::new(), &format!("{url}/api/animes/")).unwrap();

        assert_eq!(client.check(&[1535, 500, 7]).await.unwrap(), vec![500]);
    }

    #[tokio::test]
    async fn test_status_codes() {
        let router = Router::new()
            .route("/limited/check", post(|| async { StatusCode::TOO_MANY_REQUESTS }))
            // Success codes other than 200 are failures too
            .route("/accepted/check", post(|| async { StatusCode::ACCEPTED }))
            .route(
                "/garbage/check",
                post(|| async { (StatusCode::OK, "<html>") }),
            );
        let url = spawn_mock_server(router).await;
        let client = |path: &str| {
            CatalogClient::new(reqwest::Client::new(), &format!("{url}/{path}")).unwrap()
        };

        assert!(client("limited").check(&[1]).await.unwrap_err().is_rate_limited());
        assert!(matches!(
            client("accepted").check(&[1]).await,
            Err(FetchError::UnexpectedStatus(StatusCode::ACCEPTED))
        ));
        assert!(matches!(
            client("garbage").check(&[1]).await,
            Err(FetchError::Request(_))
        ));
    }
}
