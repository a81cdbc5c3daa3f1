//! Tavily search client
//!
//! Primary web search provider. Supports domain-restricted queries so the
//! first pass can stay inside trusted record-market sites.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::types::SearchHit;
use serde::Deserialize;
use std::time::Duration;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily API client
pub struct TavilyClient {
    http_client: reqwest::Client,
    api_key: String,
}

impl TavilyClient {
    pub fn new(api_key: String) -> Result<Self, PortError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            api_key,
        })
    }

    pub async fn search(
        &self,
        query: &str,
        include_domains: &[&str],
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        let mut body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
        });
        if !include_domains.is_empty() {
            body["include_domains"] = serde_json::json!(include_domains);
        }

        tracing::debug!(query, domains = include_domains.len(), "Tavily search");

        let response = self
            .http_client
            .post(TAVILY_SEARCH_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, "Tavily"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "Tavily"));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(format!("Tavily response: {}", e)))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|result| SearchHit {
                title: result.title,
                url: result.url,
                snippet: result.content,
            })
            .collect())
    }
}
