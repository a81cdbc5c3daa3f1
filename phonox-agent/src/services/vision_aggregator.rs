//! Multi-image vision aggregation
//!
//! Merges the per-image proposals into one aggregated metadata. The merge is
//! LLM-assisted for robustness to naming variants ("PINK FLOYD" vs
//! "Pink Floyd"), but a deterministic algorithm defines the contract: it
//! validates the LLM's choices and takes over entirely when the model is
//! unavailable or returns invalid JSON.
//!
//! # Deterministic contract
//! - Scalar fields: highest-confidence non-null value wins; ties broken by
//!   supporting image count, then by later image index (label/spine beats
//!   front cover for catalog fields).
//! - `all_barcodes` / `all_catalog_numbers`: de-duplicated unions, most
//!   frequent first, ties first-seen; the chosen barcode is the head of that
//!   ordering.
//! - Genres: case-insensitive union, frequency-ordered, capped.
//! - Condition: worst Goldmine grade across proposals; notes concatenated in
//!   image order.
//! - Aggregated confidence: per-image confidences weighted by each
//!   proposal's non-null field count.

use crate::ports::LlmClient;
use crate::retry::{call_with_retry, RetryPolicy};
use crate::types::{AggregatedMetadata, ImageProposal, MetadataProposal};
use phonox_common::{AgentConfig, Condition};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel strings the vision model emits instead of null
const SENTINELS: [&str; 3] = ["unknown", "n/a", "error"];

/// Years outside this window are treated as hallucinated
const MIN_PLAUSIBLE_YEAR: i32 = 1900;

/// Aggregation stage
pub struct VisionAggregator {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_genres: usize,
    retry: RetryPolicy,
}

/// Scalar choices the LLM merge is allowed to make
#[derive(Debug, Deserialize)]
struct LlmMergeChoice {
    artist: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    label: Option<String>,
    catalog_number: Option<String>,
    barcode: Option<String>,
}

impl VisionAggregator {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AgentConfig) -> Self {
        Self {
            llm,
            model: config.aggregation_model.clone(),
            max_genres: config.max_genres,
            retry: RetryPolicy::default(),
        }
    }

    /// Merge per-image proposals into one aggregated metadata
    pub async fn aggregate(
        &self,
        proposals: &[ImageProposal],
        current_year: i32,
        call_timeout: Duration,
    ) -> AggregatedMetadata {
        let sanitized: Vec<ImageProposal> = proposals
            .iter()
            .map(|p| ImageProposal {
                image_index: p.image_index,
                proposal: sanitize_proposal(&p.proposal, current_year),
            })
            .collect();

        let mut merged = deterministic_merge(&sanitized, self.max_genres);
        // Audit trail keeps the proposals as the extractor produced them
        merged.image_results = proposals.to_vec();
        merged.processed_images = proposals
            .iter()
            .map(|p| p.image_index + 1)
            .max()
            .unwrap_or(0)
            .max(proposals.len());

        // A single proposal needs no reconciliation
        if sanitized.len() > 1 && !merged.is_empty() {
            match self.llm_merge(&sanitized, call_timeout).await {
                Some(choice) => apply_llm_choice(&mut merged, &sanitized, choice),
                None => {
                    tracing::debug!("LLM merge unavailable, deterministic aggregation stands");
                }
            }
        }

        tracing::info!(
            proposals = proposals.len(),
            artist = ?merged.artist,
            title = ?merged.title,
            barcode = ?merged.barcode,
            condition = ?merged.condition,
            confidence = merged.confidence,
            "Vision aggregation complete"
        );
        merged
    }

    async fn llm_merge(
        &self,
        proposals: &[ImageProposal],
        call_timeout: Duration,
    ) -> Option<LlmMergeChoice> {
        let serialized = serde_json::to_string(proposals).ok()?;
        let prompt = format!(
            "You reconcile vinyl-record metadata proposals extracted from multiple \
             photographs of the same record. Proposals may disagree on spelling or \
             casing; choose the best value for each field, or null when no proposal \
             supports one. Never invent values absent from every proposal.\n\
             Respond with strict JSON, exactly these keys:\n\
             {{\"artist\": string|null, \"title\": string|null, \"year\": number|null, \
             \"label\": string|null, \"catalog_number\": string|null, \"barcode\": string|null}}\n\
             Proposals:\n{}",
            serialized
        );

        let response = call_with_retry("aggregation", call_timeout, &self.retry, || {
            self.llm.complete(&self.model, &prompt, 512)
        })
        .await
        .ok()?;

        match serde_json::from_str::<LlmMergeChoice>(extract_json(&response)) {
            Ok(choice) => Some(choice),
            Err(err) => {
                tracing::warn!(error = %err, "LLM merge returned invalid JSON, falling back");
                None
            }
        }
    }
}

/// Trim the fenced/prefixed noise LLMs wrap around JSON bodies
fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Coerce sentinel strings, malformed barcodes and implausible years to null
/// before merging. Advisory only: logged, never fatal.
pub(crate) fn sanitize_proposal(proposal: &MetadataProposal, current_year: i32) -> MetadataProposal {
    let mut clean = proposal.clone();
    clean.artist = coerce_sentinel(clean.artist);
    clean.title = coerce_sentinel(clean.title);
    clean.label = coerce_sentinel(clean.label);
    clean.catalog_number = coerce_sentinel(clean.catalog_number);
    clean.condition_notes = coerce_sentinel(clean.condition_notes);
    clean.genres = clean
        .genres
        .into_iter()
        .filter_map(|g| coerce_sentinel(Some(g)))
        .collect();

    if let Some(year) = clean.year {
        if !(MIN_PLAUSIBLE_YEAR..=current_year + 1).contains(&year) {
            tracing::warn!(year, "Rejecting implausible year from vision proposal");
            clean.year = None;
        }
    }
    if let Some(barcode) = clean.barcode.take() {
        if is_valid_barcode(&barcode) {
            clean.barcode = Some(barcode);
        } else {
            tracing::warn!(barcode = %barcode, "Rejecting malformed barcode from vision proposal");
        }
    }
    clean.confidence = clean.confidence.clamp(0.0, 1.0);
    clean
}

fn coerce_sentinel(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || SENTINELS.contains(&trimmed.to_lowercase().as_str()) {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// Barcodes are 12-13 digit strings, nothing else
pub(crate) fn is_valid_barcode(candidate: &str) -> bool {
    (12..=13).contains(&candidate.len()) && candidate.chars().all(|c| c.is_ascii_digit())
}

/// One value competing for a scalar field
struct Candidate<T> {
    value: T,
    best_confidence: f64,
    support: usize,
    last_index: usize,
}

fn merge_string_field<'a, F>(proposals: &'a [ImageProposal], extract: F) -> Option<String>
where
    F: Fn(&'a MetadataProposal) -> Option<&'a String>,
{
    let mut candidates: Vec<Candidate<String>> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for entry in proposals {
        let Some(value) = extract(&entry.proposal) else {
            continue;
        };
        let key = value.to_lowercase();
        match by_key.get(&key) {
            Some(&slot) => {
                let candidate = &mut candidates[slot];
                candidate.support += 1;
                candidate.last_index = entry.image_index;
                // Casing follows the most confident supporter
                if entry.proposal.confidence > candidate.best_confidence {
                    candidate.best_confidence = entry.proposal.confidence;
                    candidate.value = value.clone();
                }
            }
            None => {
                by_key.insert(key, candidates.len());
                candidates.push(Candidate {
                    value: value.clone(),
                    best_confidence: entry.proposal.confidence,
                    support: 1,
                    last_index: entry.image_index,
                });
            }
        }
    }

    pick_candidate(candidates)
}

fn merge_year_field(proposals: &[ImageProposal]) -> Option<i32> {
    let mut candidates: Vec<Candidate<i32>> = Vec::new();
    for entry in proposals {
        let Some(year) = entry.proposal.year else {
            continue;
        };
        match candidates.iter_mut().find(|c| c.value == year) {
            Some(candidate) => {
                candidate.support += 1;
                candidate.last_index = entry.image_index;
                candidate.best_confidence = candidate.best_confidence.max(entry.proposal.confidence);
            }
            None => candidates.push(Candidate {
                value: year,
                best_confidence: entry.proposal.confidence,
                support: 1,
                last_index: entry.image_index,
            }),
        }
    }
    pick_candidate(candidates)
}

/// Highest confidence wins; ties by support count, then by later image index
fn pick_candidate<T>(candidates: Vec<Candidate<T>>) -> Option<T> {
    candidates
        .into_iter()
        .max_by(|a, b| {
            a.best_confidence
                .partial_cmp(&b.best_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.support.cmp(&b.support))
                .then(a.last_index.cmp(&b.last_index))
        })
        .map(|c| c.value)
}

/// De-duplicated union ordered by frequency, ties first-seen
fn frequency_union<'a, I>(values: I) -> Vec<String>
where
    I: Iterator<Item = &'a str>,
{
    let mut order: Vec<(String, usize, usize)> = Vec::new(); // (value, count, first_seen)
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (seen, value) in values.enumerate() {
        let key = value.to_lowercase();
        match by_key.get(&key) {
            Some(&slot) => order[slot].1 += 1,
            None => {
                by_key.insert(key, order.len());
                order.push((value.to_string(), 1, seen));
            }
        }
    }
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    order.into_iter().map(|(value, _, _)| value).collect()
}

/// The deterministic aggregation contract
pub(crate) fn deterministic_merge(
    proposals: &[ImageProposal],
    max_genres: usize,
) -> AggregatedMetadata {
    let mut merged = AggregatedMetadata {
        artist: merge_string_field(proposals, |p| p.artist.as_ref()),
        title: merge_string_field(proposals, |p| p.title.as_ref()),
        year: merge_year_field(proposals),
        label: merge_string_field(proposals, |p| p.label.as_ref()),
        catalog_number: merge_string_field(proposals, |p| p.catalog_number.as_ref()),
        ..AggregatedMetadata::default()
    };

    merged.all_barcodes = frequency_union(
        proposals
            .iter()
            .filter_map(|p| p.proposal.barcode.as_deref()),
    );
    merged.barcode = merged.all_barcodes.first().cloned();
    merged.all_catalog_numbers = frequency_union(
        proposals
            .iter()
            .filter_map(|p| p.proposal.catalog_number.as_deref()),
    );

    let mut genres = frequency_union(
        proposals
            .iter()
            .flat_map(|p| p.proposal.genres.iter().map(String::as_str)),
    );
    genres.truncate(max_genres);
    merged.genres = genres;

    // Pessimistic condition: the worst grade seen anywhere wins
    merged.condition = proposals
        .iter()
        .filter_map(|p| p.proposal.condition)
        .fold(None, |acc: Option<Condition>, c| {
            Some(acc.map_or(c, |prev| prev.worse(c)))
        });
    let notes: Vec<&str> = proposals
        .iter()
        .filter_map(|p| p.proposal.condition_notes.as_deref())
        .collect();
    if !notes.is_empty() {
        merged.condition_notes = Some(notes.join("; "));
    }

    // Confidence: weighted mean over non-null field counts
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for entry in proposals {
        let fields = entry.proposal.non_null_fields() as f64;
        weighted_sum += entry.proposal.confidence * fields;
        weight_total += fields;
    }
    merged.confidence = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    };

    // Dominant proposal: most populated, then most confident, earliest wins ties
    merged.image_index = proposals
        .iter()
        .max_by(|a, b| {
            a.proposal
                .non_null_fields()
                .cmp(&b.proposal.non_null_fields())
                .then(
                    a.proposal
                        .confidence
                        .partial_cmp(&b.proposal.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.image_index.cmp(&a.image_index))
        })
        .map(|p| p.image_index)
        .unwrap_or(0);

    merged.processed_images = proposals.len();
    merged
}

/// Accept the LLM's scalar choices only where some proposal supports them;
/// lists, condition and confidence always come from the deterministic merge.
fn apply_llm_choice(
    merged: &mut AggregatedMetadata,
    proposals: &[ImageProposal],
    choice: LlmMergeChoice,
) {
    let supports_string = |field: &Option<String>, extract: fn(&MetadataProposal) -> Option<&String>| {
        field.as_ref().is_some_and(|v| {
            proposals
                .iter()
                .filter_map(|p| extract(&p.proposal))
                .any(|seen| seen.eq_ignore_ascii_case(v))
        })
    };

    if supports_string(&choice.artist, |p| p.artist.as_ref()) {
        merged.artist = choice.artist;
    }
    if supports_string(&choice.title, |p| p.title.as_ref()) {
        merged.title = choice.title;
    }
    if supports_string(&choice.label, |p| p.label.as_ref()) {
        merged.label = choice.label;
    }
    if supports_string(&choice.catalog_number, |p| p.catalog_number.as_ref()) {
        merged.catalog_number = choice.catalog_number;
    }
    if let Some(year) = choice.year {
        if proposals.iter().any(|p| p.proposal.year == Some(year)) {
            merged.year = Some(year);
        }
    }
    if let Some(barcode) = choice.barcode {
        if merged.all_barcodes.iter().any(|b| b == &barcode) {
            merged.barcode = Some(barcode);
        }
    }
}
