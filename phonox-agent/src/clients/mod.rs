//! Concrete port implementations over HTTP
//!
//! Default clients for the external providers. Hosts may swap any of them
//! for their own port implementations; tests inject deterministic fakes
//! instead.

pub mod discogs;
pub mod duckduckgo;
pub mod musicbrainz;
pub mod openai;
pub mod scraper;
pub mod tavily;

pub use discogs::DiscogsClient;
pub use duckduckgo::DuckDuckGoClient;
pub use musicbrainz::MusicBrainzClient;
pub use openai::OpenAiClient;
pub use scraper::PageScraper;
pub use tavily::TavilyClient;

use crate::error::PortError;
use crate::ports::SearchPort;
use crate::types::SearchHit;
use async_trait::async_trait;

/// User agent sent by every client
pub(crate) const USER_AGENT: &str = "Phonox/0.1.0 (https://github.com/hoshi42/phonox)";

/// Shared HTTP status classification: 408/429/5xx are transient, any other
/// non-success is fatal
pub(crate) fn classify_status(status: reqwest::StatusCode, context: &str) -> PortError {
    let code = status.as_u16();
    if code == 408 || code == 429 || status.is_server_error() {
        PortError::Transient(format!("{} returned {}", context, code))
    } else {
        PortError::Fatal(format!("{} returned {}", context, code))
    }
}

/// Map a reqwest transport error; timeouts and connection failures are
/// transient, anything else fatal
pub(crate) fn map_request_error(err: reqwest::Error, context: &str) -> PortError {
    if err.is_timeout() || err.is_connect() {
        PortError::Transient(format!("{}: {}", context, err))
    } else {
        PortError::Fatal(format!("{}: {}", context, err))
    }
}

/// Combined web search client: Tavily primary, DuckDuckGo fallback
///
/// When no Tavily key is configured the primary path reports itself
/// unavailable and the search stage falls straight through to the fallback.
pub struct SearchClient {
    tavily: Option<TavilyClient>,
    duckduckgo: DuckDuckGoClient,
}

impl SearchClient {
    pub fn new(tavily: Option<TavilyClient>, duckduckgo: DuckDuckGoClient) -> Self {
        Self { tavily, duckduckgo }
    }
}

#[async_trait]
impl SearchPort for SearchClient {
    async fn tavily(
        &self,
        query: &str,
        include_domains: &[&str],
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        match &self.tavily {
            Some(client) => client.search(query, include_domains, max_results).await,
            None => Err(PortError::Fatal("Tavily not configured".to_string())),
        }
    }

    async fn duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        self.duckduckgo.search(query, max_results).await
    }
}
