//! Web search with scraping fallback
//!
//! Runs only when the evidence gathered so far is weak (below the fallback
//! trigger) or the caller explicitly requested enrichment. Tavily is the
//! primary provider, first restricted to trusted record-market domains,
//! then unrestricted; DuckDuckGo is the keyless fallback with a cleaned
//! query, because the free endpoint is more susceptible to irrelevant
//! matches on noisy queries. At most a handful of result pages are scraped,
//! each under a hard timeout; a slow host can cost its excerpt, never the
//! stage.

use crate::ports::{ScraperPort, SearchPort};
use crate::types::{
    AggregatedMetadata, Evidence, EvidenceSource, ScrapedPage, SearchHit, SearchProviderKind,
    WebSearchOutcome,
};
use phonox_common::{AgentConfig, Clock};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

/// Fixed confidence for websearch evidence
const WEBSEARCH_CONFIDENCE: f64 = 0.60;

/// Domains tried first on the primary provider
const TRUSTED_DOMAINS: [&str; 3] = ["discogs.com", "musicbrainz.org", "allmusic.com"];

/// Result count requested from either provider
const SEARCH_MAX_RESULTS: usize = 5;

fn parenthetical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").expect("static regex"))
}

fn catalog_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Tokens like BLCKND055-1 or DEF-24208: letters and digits mashed
    // together, optionally dash-separated
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$").expect("static regex")
    })
}

/// Web search stage
pub struct WebSearch {
    search: Arc<dyn SearchPort>,
    scraper: Arc<dyn ScraperPort>,
    clock: Arc<dyn Clock>,
    max_urls: usize,
    scrape_timeout: Duration,
}

impl WebSearch {
    pub fn new(
        search: Arc<dyn SearchPort>,
        scraper: Arc<dyn ScraperPort>,
        clock: Arc<dyn Clock>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            search,
            scraper,
            clock,
            max_urls: config.web_scraping_max_urls,
            scrape_timeout: config.web_scraping_timeout(),
        }
    }

    /// Run the search; `None` when there is nothing to query on
    pub async fn run(
        &self,
        metadata: &AggregatedMetadata,
    ) -> Option<(WebSearchOutcome, Evidence)> {
        let query = build_query(metadata)?;
        tracing::info!(query = %query, "Web search starting");

        let (provider, hits) = self.search_with_fallback(&query).await;
        let hits = dedup_by_url(hits);

        let mut scraped = Vec::new();
        for hit in hits.iter().take(self.max_urls) {
            match self.scraper.fetch(&hit.url, self.scrape_timeout).await {
                Ok(body) => scraped.push(ScrapedPage {
                    url: hit.url.clone(),
                    excerpt: body,
                }),
                Err(err) => {
                    // Individual scrape failures are swallowed
                    tracing::warn!(url = %hit.url, error = %err, "Scrape failed, skipping page");
                }
            }
        }

        let outcome = WebSearchOutcome {
            query: query.clone(),
            provider,
            hits,
            scraped,
        };
        let data = serde_json::json!({
            "query": outcome.query,
            "provider": outcome.provider,
            "results": outcome.hits,
            "excerpts": outcome.scraped,
        });
        let evidence = Evidence::new(
            EvidenceSource::WebSearch,
            WEBSEARCH_CONFIDENCE,
            data,
            self.clock.now(),
        );
        Some((outcome, evidence))
    }

    /// Tavily restricted -> Tavily unrestricted -> DuckDuckGo with a cleaned
    /// query. Whatever produced hits wins; total outage yields zero hits.
    async fn search_with_fallback(&self, query: &str) -> (SearchProviderKind, Vec<SearchHit>) {
        match self
            .search
            .tavily(query, &TRUSTED_DOMAINS, SEARCH_MAX_RESULTS)
            .await
        {
            Ok(hits) if !hits.is_empty() => return (SearchProviderKind::Tavily, hits),
            Ok(_) => {
                tracing::debug!("Domain-restricted search empty, retrying unrestricted");
                match self.search.tavily(query, &[], SEARCH_MAX_RESULTS).await {
                    Ok(hits) if !hits.is_empty() => return (SearchProviderKind::Tavily, hits),
                    Ok(_) => tracing::debug!("Unrestricted search empty"),
                    Err(err) => {
                        tracing::warn!(error = %err, "Unrestricted search failed")
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Primary search provider unavailable");
            }
        }

        let cleaned = clean_query(query);
        match self
            .search
            .duckduckgo(&cleaned, SEARCH_MAX_RESULTS)
            .await
        {
            Ok(hits) => (SearchProviderKind::DuckDuckGo, hits),
            Err(err) => {
                tracing::warn!(error = %err, "Fallback search provider failed");
                (SearchProviderKind::DuckDuckGo, Vec::new())
            }
        }
    }
}

/// `"{artist} {title} vinyl record price"` plus catalog number and year when
/// present; `None` without at least an artist and a title
pub(crate) fn build_query(metadata: &AggregatedMetadata) -> Option<String> {
    let artist = metadata.artist.as_deref()?;
    let title = metadata.title.as_deref()?;
    let mut query = format!("{} {} vinyl record price", artist, title);
    if let Some(catalog_number) = metadata.catalog_number.as_deref() {
        query.push(' ');
        query.push_str(catalog_number);
    }
    if let Some(year) = metadata.year {
        query.push(' ');
        query.push_str(&year.to_string());
    }
    Some(query)
}

/// Strip the noise that derails the free fallback: forward slashes,
/// parenthesized fragments, naked catalog numbers
pub(crate) fn clean_query(query: &str) -> String {
    let no_parens = parenthetical_re().replace_all(query, " ");
    let no_slashes = no_parens.replace('/', " ");
    let kept: Vec<&str> = no_slashes
        .split_whitespace()
        .filter(|token| !looks_like_catalog_number(token))
        .collect();
    kept.join(" ")
}

fn looks_like_catalog_number(token: &str) -> bool {
    // Years and other short digit runs stay; mixed letter-digit tokens and
    // long digit runs read as catalog numbers
    let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    if has_alpha && has_digit {
        return catalog_token_re().is_match(token);
    }
    has_digit && token.len() > 4 && token.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// First-seen-order URL de-duplication across providers
pub(crate) fn dedup_by_url(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.url.clone()))
        .collect()
}
