//! Mapping source backed by the AniList GraphQL API.

use crate::source::{FetchError, IdMapping, MappingSource};
use crate::types::{PrimaryId, SecondaryId};
use async_trait::async_trait;
use http::StatusCode;
use http::header::ACCEPT;
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ANILIST_URL: &str = "https://graphql.anilist.co";

const MEDIA_QUERY: &str =
    "query ($ids: [Int]) { Page { media(id_in: $ids, type: ANIME) { id idMal } } }";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'static str,
    variables: Variables<'a>,
}

#[derive(Serialize)]
struct Variables<'a> {
    ids: &'a [PrimaryId],
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<PageData>,
}

#[derive(Deserialize)]
struct PageData {
    #[serde(rename = "Page")]
    page: Option<MediaPage>,
}

#[derive(Deserialize)]
struct MediaPage {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Deserialize)]
struct Media {
    id: PrimaryId,
    #[serde(rename = "idMal")]
    id_mal: Option<SecondaryId>,
}

pub struct AniListClient {
    client: reqwest::Client,
    url: Url,
}

impl AniListClient {
    pub fn new(client: reqwest::Client, url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        Ok(AniListClient { client, url })
    }
}

#[async_trait]
impl MappingSource for AniListClient {
    async fn resolve(&self, ids: &[PrimaryId]) -> Result<Vec<IdMapping>, FetchError> {
        let body = GraphQlRequest {
            query: MEDIA_QUERY,
            variables: Variables { ids },
        };

        let response = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status if !status.is_success() => return Err(FetchError::UnexpectedStatus(status)),
            _ => {}
        }

        let media = response
            .json::<GraphQlResponse>()
            .await?
            .data
            .and_then(|data| data.page)
            .map(|page| page.media)
            .unwrap_or_default();

        Ok(media
            .into_iter()
            .map(|m| IdMapping {
                primary_id: m.id,
                secondary_id: m.id_mal,
            })
            .collect())
    }
}
