//! Confidence gate
//!
//! Pure function over the evidence chain: a weighted mean of per-source
//! confidences routed into auto-commit / review decisions. Identical chains
//! always produce identical decisions.

use crate::types::{Evidence, GateDecision};

/// Inclusive auto-commit threshold
pub const AUTO_COMMIT_THRESHOLD: f64 = 0.85;
/// Below this the record needs a manual-review pass
pub const MANUAL_REVIEW_THRESHOLD: f64 = 0.70;
/// Below this identification failed badly enough to require manual entry
pub const MANUAL_ENTRY_THRESHOLD: f64 = 0.50;

/// Weighted confidence over the evidence chain
///
/// ```text
/// confidence = min(1.0, Σ ev.confidence × W[ev.source] / Σ W[ev.source])
/// ```
///
/// Sources outside the canonical set contribute weight 0.10. An empty chain
/// scores 0.
pub fn combined_confidence(evidence: &[Evidence]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for entry in evidence {
        let weight = entry.source.weight();
        weighted_sum += entry.confidence * weight;
        total_weight += weight;
    }
    if total_weight > 0.0 {
        (weighted_sum / total_weight).min(1.0)
    } else {
        0.0
    }
}

/// Routing over a computed confidence
pub fn route(confidence: f64) -> GateDecision {
    if confidence >= AUTO_COMMIT_THRESHOLD {
        GateDecision {
            confidence,
            auto_commit: true,
            needs_review: false,
            review_reason: None,
        }
    } else if confidence >= MANUAL_REVIEW_THRESHOLD {
        GateDecision {
            confidence,
            auto_commit: false,
            needs_review: true,
            review_reason: Some("confidence".to_string()),
        }
    } else if confidence >= MANUAL_ENTRY_THRESHOLD {
        GateDecision {
            confidence,
            auto_commit: false,
            needs_review: true,
            review_reason: Some("low_confidence_fallback".to_string()),
        }
    } else {
        GateDecision {
            confidence,
            auto_commit: false,
            needs_review: true,
            review_reason: Some("manual_entry_required".to_string()),
        }
    }
}

/// Score an evidence chain and route the result
pub fn score(evidence: &[Evidence]) -> GateDecision {
    route(combined_confidence(evidence))
}
