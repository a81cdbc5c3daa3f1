//! Discogs API client
//!
//! Barcode-exact and fuzzy (artist, title) release search against the
//! Discogs database, rate-limited to the documented 60 requests/minute.
//! Fuzzy relevance blends result rank with normalized title similarity so
//! identical inputs always score identically.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::limiter::ProviderLimiter;
use crate::ports::DiscogsPort;
use crate::types::DiscogsHit;
use async_trait::async_trait;
use phonox_common::AgentConfig;
use serde::Deserialize;
use std::time::Duration;

const DISCOGS_BASE_URL: &str = "https://api.discogs.com";
const REQUESTS_PER_MINUTE: u32 = 60;
const SEARCH_PAGE_SIZE: u32 = 5;

/// Discogs `/database/search` response
#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    /// "Artist - Title"
    title: String,
    year: Option<String>,
    label: Option<Vec<String>>,
    catno: Option<String>,
    barcode: Option<Vec<String>>,
    genre: Option<Vec<String>>,
    style: Option<Vec<String>>,
}

/// Discogs `/releases/{id}` response, reduced to the link fields
#[derive(Debug, Deserialize)]
struct ReleaseDetail {
    videos: Option<Vec<ReleaseVideo>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseVideo {
    uri: String,
}

/// Discogs API client with process-wide rate limiting
pub struct DiscogsClient {
    http_client: reqwest::Client,
    token: Option<String>,
    rate_limiter: ProviderLimiter,
    rate_limit_wait: Duration,
}

impl DiscogsClient {
    pub fn new(config: &AgentConfig) -> Result<Self, PortError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            token: config.discogs_token.clone(),
            rate_limiter: ProviderLimiter::per_minute("discogs", REQUESTS_PER_MINUTE),
            rate_limit_wait: config.rate_limit_wait(),
        })
    }

    async fn run_search(&self, params: &[(&str, &str)]) -> Result<SearchResponse, PortError> {
        self.rate_limiter.acquire(self.rate_limit_wait).await?;

        let url = format!("{}/database/search", DISCOGS_BASE_URL);
        let mut request = self.http_client.get(&url).query(params);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Discogs token={}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_request_error(e, "Discogs"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "Discogs"));
        }

        response
            .json()
            .await
            .map_err(|e| PortError::Parse(format!("Discogs response: {}", e)))
    }

    /// Release detail fetch, only to surface a Spotify link. Best-effort:
    /// any failure just means no enrichment.
    async fn fetch_spotify_url(&self, release_id: u64) -> Option<String> {
        if self.rate_limiter.acquire(self.rate_limit_wait).await.is_err() {
            return None;
        }
        let url = format!("{}/releases/{}", DISCOGS_BASE_URL, release_id);
        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Discogs token={}", token));
        }
        let detail: ReleaseDetail = match request.send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(detail) => detail,
                Err(err) => {
                    tracing::debug!(release_id, error = %err, "Unparseable release detail");
                    return None;
                }
            },
            Ok(response) => {
                tracing::debug!(release_id, status = %response.status(), "Release detail fetch refused");
                return None;
            }
            Err(err) => {
                tracing::debug!(release_id, error = %err, "Release detail fetch failed");
                return None;
            }
        };

        detail
            .videos
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.uri)
            .find(|uri| uri.contains("open.spotify.com"))
    }

    fn to_hit(result: &SearchResult, relevance: f64) -> DiscogsHit {
        let (artist, title) = split_title(&result.title);
        DiscogsHit {
            artist,
            title,
            year: result.year.as_deref().and_then(|y| y.parse().ok()),
            label: result
                .label
                .as_ref()
                .and_then(|labels| labels.first().cloned()),
            catalog_number: result.catno.clone(),
            barcode: result
                .barcode
                .as_ref()
                .and_then(|codes| codes.first().cloned()),
            genres: {
                let mut genres = result.genre.clone().unwrap_or_default();
                genres.extend(result.style.clone().unwrap_or_default());
                genres
            },
            relevance,
            spotify_url: None,
        }
    }
}

/// Discogs search titles come as "Artist - Title"
fn split_title(combined: &str) -> (Option<String>, Option<String>) {
    match combined.split_once(" - ") {
        Some((artist, title)) => (
            Some(artist.trim().to_string()),
            Some(title.trim().to_string()),
        ),
        None => (None, Some(combined.trim().to_string())),
    }
}

/// Deterministic fuzzy relevance: result rank blended with normalized title
/// similarity
fn fuzzy_relevance(rank: usize, wanted_title: &str, hit_title: Option<&str>) -> f64 {
    let rank_score = (1.0 - rank as f64 * 0.15).max(0.0);
    let similarity = hit_title
        .map(|hit| {
            strsim::normalized_levenshtein(&wanted_title.to_lowercase(), &hit.to_lowercase())
        })
        .unwrap_or(0.0);
    (0.5 * rank_score + 0.5 * similarity).clamp(0.0, 1.0)
}

#[async_trait]
impl DiscogsPort for DiscogsClient {
    async fn by_barcode(&self, barcode: &str) -> Result<Vec<DiscogsHit>, PortError> {
        tracing::debug!(barcode, "Discogs barcode lookup");
        let page_size = SEARCH_PAGE_SIZE.to_string();
        let response = self
            .run_search(&[
                ("barcode", barcode),
                ("type", "release"),
                ("per_page", &page_size),
            ])
            .await?;

        let mut hits: Vec<DiscogsHit> = response
            .results
            .iter()
            .map(|result| Self::to_hit(result, 1.0))
            .collect();

        // Exact barcode match is the one place a Spotify link is worth a
        // second request
        if let (Some(first_hit), Some(first_result)) = (hits.first_mut(), response.results.first())
        {
            first_hit.spotify_url = self.fetch_spotify_url(first_result.id).await;
        }

        tracing::info!(barcode, hit_count = hits.len(), "Discogs barcode lookup complete");
        Ok(hits)
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Vec<DiscogsHit>, PortError> {
        tracing::debug!(artist, title, "Discogs fuzzy search");
        let page_size = SEARCH_PAGE_SIZE.to_string();
        let response = self
            .run_search(&[
                ("artist", artist),
                ("release_title", title),
                ("type", "release"),
                ("per_page", &page_size),
            ])
            .await?;

        let hits: Vec<DiscogsHit> = response
            .results
            .iter()
            .enumerate()
            .map(|(rank, result)| {
                let (_, hit_title) = split_title(&result.title);
                let relevance = fuzzy_relevance(rank, title, hit_title.as_deref());
                Self::to_hit(result, relevance)
            })
            .collect();

        tracing::info!(artist, title, hit_count = hits.len(), "Discogs search complete");
        Ok(hits)
    }
}
