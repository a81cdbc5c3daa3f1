//! MusicBrainz API client
//!
//! Release search over (artist, title) with an optional catalog-number
//! clause, rate-limited to the documented 1 request/second. MusicBrainz
//! requires a meaningful User-Agent; anonymous clients get throttled hard.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::limiter::ProviderLimiter;
use crate::ports::MusicBrainzPort;
use crate::types::MusicBrainzHit;
use async_trait::async_trait;
use phonox_common::AgentConfig;
use serde::Deserialize;
use std::time::Duration;

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const REQUESTS_PER_SECOND: u32 = 1;
const SEARCH_LIMIT: u32 = 5;

/// MusicBrainz release search response
#[derive(Debug, Deserialize)]
struct ReleaseSearchResponse {
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct Release {
    title: String,
    /// Search score 0-100
    score: Option<i32>,
    date: Option<String>,
    #[serde(rename = "artist-credit")]
    artist_credit: Option<Vec<ArtistCredit>>,
    #[serde(rename = "label-info")]
    label_info: Option<Vec<LabelInfo>>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LabelInfo {
    #[serde(rename = "catalog-number")]
    catalog_number: Option<String>,
    label: Option<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

/// MusicBrainz API client with process-wide rate limiting
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    rate_limiter: ProviderLimiter,
    rate_limit_wait: Duration,
}

impl MusicBrainzClient {
    pub fn new(config: &AgentConfig) -> Result<Self, PortError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            rate_limiter: ProviderLimiter::per_second("musicbrainz", REQUESTS_PER_SECOND),
            rate_limit_wait: config.rate_limit_wait(),
        })
    }
}

/// Escape Lucene special characters inside a quoted phrase
fn escape_lucene(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the Lucene query from whatever fields are known
fn build_query(artist: &str, title: &str, catalog_number: Option<&str>) -> String {
    let mut clauses = Vec::new();
    if !artist.is_empty() {
        clauses.push(format!("artist:\"{}\"", escape_lucene(artist)));
    }
    if !title.is_empty() {
        clauses.push(format!("release:\"{}\"", escape_lucene(title)));
    }
    if let Some(catalog_number) = catalog_number {
        clauses.push(format!("catno:\"{}\"", escape_lucene(catalog_number)));
    }
    clauses.join(" AND ")
}

fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(0..4)).and_then(|y| y.parse().ok())
}

#[async_trait]
impl MusicBrainzPort for MusicBrainzClient {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        catalog_number: Option<&str>,
    ) -> Result<Vec<MusicBrainzHit>, PortError> {
        let query = build_query(artist, title, catalog_number);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.rate_limiter.acquire(self.rate_limit_wait).await?;

        let url = format!("{}/release", MUSICBRAINZ_BASE_URL);
        tracing::debug!(query = %query, "Querying MusicBrainz");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("query", query.as_str()),
                ("fmt", "json"),
                ("limit", &SEARCH_LIMIT.to_string()),
            ])
            .send()
            .await
            .map_err(|e| map_request_error(e, "MusicBrainz"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "MusicBrainz"));
        }

        let parsed: ReleaseSearchResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(format!("MusicBrainz response: {}", e)))?;

        let hits: Vec<MusicBrainzHit> = parsed
            .releases
            .iter()
            .map(|release| {
                let hit_artist = release
                    .artist_credit
                    .as_ref()
                    .and_then(|credits| credits.first())
                    .map(|credit| credit.name.clone());
                let exact = hit_artist
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(artist))
                    && release.title.eq_ignore_ascii_case(title);
                let first_label = release
                    .label_info
                    .as_ref()
                    .and_then(|infos| infos.first());
                MusicBrainzHit {
                    artist: hit_artist,
                    title: Some(release.title.clone()),
                    year: year_from_date(release.date.as_deref()),
                    label: first_label
                        .and_then(|info| info.label.as_ref())
                        .map(|label| label.name.clone()),
                    catalog_number: first_label
                        .and_then(|info| info.catalog_number.clone()),
                    score: release.score.unwrap_or(0).clamp(0, 100) as f64 / 100.0,
                    exact,
                }
            })
            .collect();

        tracing::info!(
            query = %query,
            hit_count = hits.len(),
            "MusicBrainz search complete"
        );
        Ok(hits)
    }
}
