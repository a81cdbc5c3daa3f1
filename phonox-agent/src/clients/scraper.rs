//! Search-result page scraper
//!
//! Bounded page fetch for websearch enrichment: hard per-URL timeout, tags
//! stripped, whitespace collapsed, excerpt truncated. A slow or broken host
//! costs its excerpt, nothing more.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::ports::ScraperPort;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Excerpt ceiling per scraped page
const EXCERPT_MAX_CHARS: usize = 4096;

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// HTTP page scraper
pub struct PageScraper {
    http_client: reqwest::Client,
}

impl PageScraper {
    pub fn new() -> Result<Self, PortError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ScraperPort for PageScraper {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, PortError> {
        tracing::debug!(url, timeout_ms = timeout.as_millis() as u64, "Scraping page");

        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(e, "Scraper"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "Scraper"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PortError::Parse(format!("Scraper body: {}", e)))?;

        Ok(extract_text(&body))
    }
}

/// Strip markup down to a bounded text excerpt
pub(crate) fn extract_text(html: &str) -> String {
    let without_blocks = script_style_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_blocks, " ");
    let collapsed: Vec<&str> = without_tags.split_whitespace().collect();
    let mut text = collapsed.join(" ");
    if text.len() > EXCERPT_MAX_CHARS {
        // Truncate on a char boundary
        let mut cut = EXCERPT_MAX_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_styles_and_tags() {
        let html = r#"
            <html><head><style>.x { color: red }</style>
            <script>alert("hi")</script></head>
            <body><h1>Danzig LP</h1><p>Price:  <b>€45</b></p></body></html>
        "#;
        assert_eq!(extract_text(html), "Danzig LP Price: €45");
    }

    #[test]
    fn truncates_long_bodies() {
        let html = format!("<p>{}</p>", "word ".repeat(2000));
        assert!(extract_text(&html).len() <= EXCERPT_MAX_CHARS);
    }
}
