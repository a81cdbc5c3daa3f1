//! DuckDuckGo fallback search
//!
//! Keyless fallback when the primary provider is unavailable or empty. Uses
//! the HTML endpoint and a light anchor parse; good enough for the handful
//! of price-reference hits the valuation needs.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::types::SearchHit;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

fn result_anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<a[^>]+class="result__a"[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// DuckDuckGo HTML-endpoint client
pub struct DuckDuckGoClient {
    http_client: reqwest::Client,
}

impl DuckDuckGoClient {
    pub fn new() -> Result<Self, PortError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        tracing::debug!(query, "DuckDuckGo fallback search");

        let response = self
            .http_client
            .get(DUCKDUCKGO_HTML_URL)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| map_request_error(e, "DuckDuckGo"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "DuckDuckGo"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PortError::Parse(format!("DuckDuckGo body: {}", e)))?;

        Ok(parse_results(&body, max_results))
    }
}

/// Pull result anchors out of the HTML page
fn parse_results(body: &str, max_results: usize) -> Vec<SearchHit> {
    result_anchor_re()
        .captures_iter(body)
        .take(max_results)
        .map(|caps| {
            let url = html_unescape(&caps[1]);
            let title = html_unescape(&tag_re().replace_all(&caps[2], ""));
            SearchHit {
                title: title.trim().to_string(),
                url,
                snippet: String::new(),
            }
        })
        .collect()
}

fn html_unescape(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
}
