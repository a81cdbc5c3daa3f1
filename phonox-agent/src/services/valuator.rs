//! Market valuation
//!
//! One structured LLM call over the aggregated metadata and the web-search
//! results, parsed against a line-prefixed grammar:
//!
//! ```text
//! ESTIMATED_VALUE: €45
//! PRICE_RANGE: €30 - €60
//! MARKET_CONDITION: stable
//! FACTOR: first pressing
//! FACTOR: sleeve wear limits ceiling
//! EXPLANATION: ...
//! ```
//!
//! The parse is deterministic: the same response text always yields the same
//! valuation, and the result replaces any prior valuation on the caller's
//! record rather than accumulating.

use crate::ports::LlmClient;
use crate::retry::{call_with_retry, RetryPolicy};
use crate::types::{AggregatedMetadata, MarketCondition, Valuation, WebSearchOutcome};
use phonox_common::AgentConfig;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

fn estimated_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*ESTIMATED_VALUE:\s*€?\s*([0-9]+(?:[.,][0-9]+)?)").expect("static regex")
    })
}

fn price_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*PRICE_RANGE:\s*€?\s*([0-9]+(?:[.,][0-9]+)?)\s*[-–]\s*€?\s*([0-9]+(?:[.,][0-9]+)?)",
        )
        .expect("static regex")
    })
}

fn market_condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*MARKET_CONDITION:\s*(\S+)").expect("static regex"))
}

fn factor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*FACTOR:\s*(.+)$").expect("static regex"))
}

fn explanation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*EXPLANATION:\s*(.+)$").expect("static regex"))
}

/// Valuation stage
pub struct Valuator {
    llm: Arc<dyn LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl Valuator {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AgentConfig) -> Self {
        Self {
            llm,
            model: config.valuation_model.clone(),
            retry: RetryPolicy::default(),
        }
    }

    /// Produce a valuation for the record. Without search results there is
    /// nothing to anchor a price on, so the all-null valuation is returned
    /// instead of a guess.
    pub async fn evaluate(
        &self,
        metadata: &AggregatedMetadata,
        search: Option<&WebSearchOutcome>,
        call_timeout: Duration,
    ) -> Valuation {
        let search = match search {
            Some(outcome) if !outcome.hits.is_empty() => outcome,
            _ => {
                tracing::debug!("No search results to anchor a valuation, returning null");
                return Valuation::null();
            }
        };

        let prompt = build_prompt(metadata, search);
        let response = call_with_retry("valuation", call_timeout, &self.retry, || {
            self.llm.complete(&self.model, &prompt, 700)
        })
        .await;

        match response {
            Ok(text) => parse_valuation(&text),
            Err(err) => {
                tracing::warn!(error = %err, "Valuation call failed, returning null valuation");
                Valuation::null()
            }
        }
    }
}

fn build_prompt(metadata: &AggregatedMetadata, search: &WebSearchOutcome) -> String {
    let mut listing = String::new();
    for hit in &search.hits {
        listing.push_str(&format!("- {} | {} | {}\n", hit.title, hit.url, hit.snippet));
    }
    for page in &search.scraped {
        listing.push_str(&format!("Excerpt from {}:\n{}\n", page.url, page.excerpt));
    }

    format!(
        "You are a vinyl record market analyst. Estimate the current market value \
         in EUR of the record below using only the listed market evidence.\n\
         Record: artist={} title={} year={} label={} catalog_number={} condition={}\n\
         Market evidence:\n{}\n\
         Answer with exactly these line-prefixed fields and nothing else:\n\
         ESTIMATED_VALUE: €<number>\n\
         PRICE_RANGE: €<number> - €<number>\n\
         MARKET_CONDITION: strong|stable|weak\n\
         FACTOR: <one factor per line, repeat as needed>\n\
         EXPLANATION: <one sentence>",
        metadata.artist.as_deref().unwrap_or("?"),
        metadata.title.as_deref().unwrap_or("?"),
        metadata.year.map_or("?".to_string(), |y| y.to_string()),
        metadata.label.as_deref().unwrap_or("?"),
        metadata.catalog_number.as_deref().unwrap_or("?"),
        metadata
            .condition
            .map_or("?".to_string(), |c| c.display_label().to_string()),
        listing
    )
}

/// Parse the line-prefixed valuation grammar. Deterministic over the input
/// text; an unparseable market condition defaults to `stable`.
pub fn parse_valuation(text: &str) -> Valuation {
    let estimated_value_eur = estimated_value_re()
        .captures(text)
        .and_then(|caps| parse_amount(&caps[1]));

    let (price_range_min, price_range_max) = match price_range_re().captures(text) {
        Some(caps) => (parse_amount(&caps[1]), parse_amount(&caps[2])),
        None => (None, None),
    };

    let market_condition = market_condition_re()
        .captures(text)
        .map(|caps| match caps[1].to_lowercase().as_str() {
            "strong" => MarketCondition::Strong,
            "weak" => MarketCondition::Weak,
            "stable" => MarketCondition::Stable,
            other => {
                tracing::debug!(value = other, "Unparseable market condition, using stable");
                MarketCondition::Stable
            }
        })
        .unwrap_or(MarketCondition::Stable);

    let factors: Vec<String> = factor_re()
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect();

    let explanation = explanation_re()
        .captures(text)
        .map(|caps| caps[1].trim().to_string());

    Valuation {
        estimated_value_eur,
        price_range_min,
        price_range_max,
        market_condition: Some(market_condition),
        factors,
        explanation,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}
