//! Intelligent metadata enhancement
//!
//! Merges a fresh analysis into an existing record without regressing what
//! is already known. Field policy:
//!
//! | existing | new | action |
//! |---|---|---|
//! | null | value | accept new, raise confidence toward the weighted mean |
//! | value | null | keep existing |
//! | equal (case-insensitive) | | keep existing, boost confidence (bounded) |
//! | different | | replace only when the new confidence clears 0.80 |
//!
//! Genres union case-insensitively (capped), condition takes the worse
//! grade, barcodes prefer the well-formed shape, and `spotify_url` is only
//! ever set when currently null. The enhancer never fails the run: any
//! internal error returns the existing record untouched with a skip entry
//! in the change log.

use crate::services::vision_aggregator::is_valid_barcode;
use crate::types::{AggregatedMetadata, ChangeAction, ChangeLogEntry};

/// A differing value replaces the existing one only above this confidence
pub const REPLACEMENT_THRESHOLD: f64 = 0.80;
/// Multiplicative confidence boost for each corroborated field
const BOOST_FACTOR: f64 = 1.05;
/// Boosting never pushes confidence past this ceiling
const BOOST_CEILING: f64 = 0.98;
/// Genre list cap after union
const MAX_GENRES: usize = 8;

/// What a single field merge did to the record
enum FieldEffect {
    Unchanged,
    Added,
    Boosted,
}

/// Merge a new analysis into existing metadata
///
/// Returns the merged metadata, the updated confidence, and a change log
/// recording every field decision.
pub fn enhance(
    existing: &AggregatedMetadata,
    new_proposal: &AggregatedMetadata,
    existing_confidence: f64,
) -> (AggregatedMetadata, f64, Vec<ChangeLogEntry>) {
    match enhance_inner(existing, new_proposal, existing_confidence) {
        Ok(result) => result,
        Err(reason) => {
            tracing::warn!(reason = %reason, "Enhancement skipped, keeping existing record");
            (
                existing.clone(),
                existing_confidence,
                vec![ChangeLogEntry {
                    field: "record".to_string(),
                    action: ChangeAction::EnhancementSkipped,
                    old: None,
                    new: Some(reason),
                    confidence: Some(existing_confidence),
                }],
            )
        }
    }
}

fn enhance_inner(
    existing: &AggregatedMetadata,
    new_proposal: &AggregatedMetadata,
    existing_confidence: f64,
) -> Result<(AggregatedMetadata, f64, Vec<ChangeLogEntry>), String> {
    if !existing_confidence.is_finite() || !new_proposal.confidence.is_finite() {
        return Err("non-finite confidence input".to_string());
    }

    let mut merged = existing.clone();
    let mut log = Vec::new();
    let mut boosts = 0usize;
    let mut any_added = false;

    let new_confidence_in = new_proposal.confidence;

    // Scalar string fields share one policy
    for (field, existing_value, new_value) in [
        ("artist", &existing.artist, &new_proposal.artist),
        ("title", &existing.title, &new_proposal.title),
        ("label", &existing.label, &new_proposal.label),
        (
            "catalog_number",
            &existing.catalog_number,
            &new_proposal.catalog_number,
        ),
    ] {
        let (value, effect) =
            merge_string(field, existing_value, new_value, new_confidence_in, &mut log);
        match effect {
            FieldEffect::Added => any_added = true,
            FieldEffect::Boosted => boosts += 1,
            FieldEffect::Unchanged => {}
        }
        match field {
            "artist" => merged.artist = value,
            "title" => merged.title = value,
            "label" => merged.label = value,
            "catalog_number" => merged.catalog_number = value,
            _ => unreachable!(),
        }
    }

    // Year: exact equality
    match (existing.year, new_proposal.year) {
        (None, Some(new_year)) => {
            merged.year = Some(new_year);
            any_added = true;
            push(&mut log, "year", ChangeAction::Added, None, Some(new_year.to_string()), new_confidence_in);
        }
        (Some(_), None) => {}
        (Some(old_year), Some(new_year)) if old_year == new_year => {
            boosts += 1;
            push(&mut log, "year", ChangeAction::Boosted, Some(old_year.to_string()), Some(new_year.to_string()), new_confidence_in);
        }
        (Some(old_year), Some(new_year)) => {
            if new_confidence_in >= REPLACEMENT_THRESHOLD {
                merged.year = Some(new_year);
                push(&mut log, "year", ChangeAction::Updated, Some(old_year.to_string()), Some(new_year.to_string()), new_confidence_in);
            } else {
                push(&mut log, "year", ChangeAction::Conflict, Some(old_year.to_string()), Some(new_year.to_string()), new_confidence_in);
            }
        }
        (None, None) => {}
    }

    // Barcode: the well-formed shape wins; ties keep existing
    match (existing.barcode.as_deref(), new_proposal.barcode.as_deref()) {
        (None, Some(new_barcode)) => {
            merged.barcode = Some(new_barcode.to_string());
            any_added = true;
            push(&mut log, "barcode", ChangeAction::Added, None, Some(new_barcode.to_string()), new_confidence_in);
        }
        (Some(old_barcode), Some(new_barcode)) if old_barcode == new_barcode => {
            boosts += 1;
            push(&mut log, "barcode", ChangeAction::Boosted, Some(old_barcode.to_string()), Some(new_barcode.to_string()), new_confidence_in);
        }
        (Some(old_barcode), Some(new_barcode)) => {
            if !is_valid_barcode(old_barcode) && is_valid_barcode(new_barcode) {
                merged.barcode = Some(new_barcode.to_string());
                push(&mut log, "barcode", ChangeAction::Updated, Some(old_barcode.to_string()), Some(new_barcode.to_string()), new_confidence_in);
            } else {
                push(&mut log, "barcode", ChangeAction::Conflict, Some(old_barcode.to_string()), Some(new_barcode.to_string()), new_confidence_in);
            }
        }
        (_, None) => {}
    }

    // Genres: case-insensitive union, existing order first, capped
    if !new_proposal.genres.is_empty() {
        let before = merged.genres.clone();
        merged.genres = union_genres(&existing.genres, &new_proposal.genres);
        if merged.genres != before {
            push(
                &mut log,
                "genres",
                if before.is_empty() { ChangeAction::Added } else { ChangeAction::Updated },
                (!before.is_empty()).then(|| before.join(", ")),
                Some(merged.genres.join(", ")),
                new_confidence_in,
            );
            if before.is_empty() {
                any_added = true;
            }
        }
    }

    // Condition: pessimistic, the worse grade wins
    match (existing.condition, new_proposal.condition) {
        (None, Some(new_condition)) => {
            merged.condition = Some(new_condition);
            any_added = true;
            push(&mut log, "condition", ChangeAction::Added, None, Some(new_condition.to_string()), new_confidence_in);
        }
        (Some(old_condition), Some(new_condition)) => {
            let worse = old_condition.worse(new_condition);
            if worse != old_condition {
                merged.condition = Some(worse);
                push(&mut log, "condition", ChangeAction::Updated, Some(old_condition.to_string()), Some(worse.to_string()), new_confidence_in);
            } else {
                push(&mut log, "condition", ChangeAction::Kept, Some(old_condition.to_string()), Some(new_condition.to_string()), new_confidence_in);
            }
        }
        (_, None) => {}
    }

    // Condition notes ride along only when nothing is recorded yet
    if merged.condition_notes.is_none() {
        if let Some(notes) = new_proposal.condition_notes.clone() {
            merged.condition_notes = Some(notes.clone());
            push(&mut log, "condition_notes", ChangeAction::Added, None, Some(notes), new_confidence_in);
        }
    }

    // spotify_url is never derived from images; only fill a hole
    if merged.spotify_url.is_none() {
        if let Some(url) = new_proposal.spotify_url.clone() {
            merged.spotify_url = Some(url.clone());
            push(&mut log, "spotify_url", ChangeAction::Added, None, Some(url), new_confidence_in);
        }
    }

    // Audit lists grow, never shrink
    for barcode in &new_proposal.all_barcodes {
        if !merged.all_barcodes.iter().any(|b| b == barcode) {
            merged.all_barcodes.push(barcode.clone());
        }
    }
    for catalog_number in &new_proposal.all_catalog_numbers {
        if !merged.all_catalog_numbers.iter().any(|c| c == catalog_number) {
            merged.all_catalog_numbers.push(catalog_number.clone());
        }
    }
    merged
        .image_results
        .extend(new_proposal.image_results.iter().cloned());
    merged.processed_images += new_proposal.processed_images;

    // Confidence: boosts compound multiplicatively under the ceiling; an
    // added field pulls confidence up toward the mean of old and new. Never
    // lowered.
    let mut confidence = existing_confidence;
    for _ in 0..boosts {
        confidence = confidence.max((confidence * BOOST_FACTOR).min(BOOST_CEILING));
    }
    if any_added {
        confidence = confidence.max((existing_confidence + new_confidence_in) / 2.0);
    }
    confidence = confidence.clamp(0.0, 1.0);
    merged.confidence = confidence;

    Ok((merged, confidence, log))
}

fn merge_string(
    field: &str,
    existing: &Option<String>,
    new: &Option<String>,
    new_confidence: f64,
    log: &mut Vec<ChangeLogEntry>,
) -> (Option<String>, FieldEffect) {
    match (existing, new) {
        (None, Some(new_value)) => {
            push(log, field, ChangeAction::Added, None, Some(new_value.clone()), new_confidence);
            (Some(new_value.clone()), FieldEffect::Added)
        }
        (Some(old_value), None) => (Some(old_value.clone()), FieldEffect::Unchanged),
        (Some(old_value), Some(new_value)) => {
            if old_value.eq_ignore_ascii_case(new_value) {
                push(log, field, ChangeAction::Boosted, Some(old_value.clone()), Some(new_value.clone()), new_confidence);
                (Some(old_value.clone()), FieldEffect::Boosted)
            } else if new_confidence >= REPLACEMENT_THRESHOLD {
                push(log, field, ChangeAction::Updated, Some(old_value.clone()), Some(new_value.clone()), new_confidence);
                (Some(new_value.clone()), FieldEffect::Unchanged)
            } else {
                push(log, field, ChangeAction::Conflict, Some(old_value.clone()), Some(new_value.clone()), new_confidence);
                (Some(old_value.clone()), FieldEffect::Unchanged)
            }
        }
        (None, None) => (None, FieldEffect::Unchanged),
    }
}

fn union_genres(existing: &[String], new: &[String]) -> Vec<String> {
    let mut union: Vec<String> = existing.to_vec();
    for genre in new {
        if !union.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
            union.push(genre.clone());
        }
    }
    union.truncate(MAX_GENRES);
    union
}

fn push(
    log: &mut Vec<ChangeLogEntry>,
    field: &str,
    action: ChangeAction,
    old: Option<String>,
    new: Option<String>,
    confidence: f64,
) {
    log.push(ChangeLogEntry {
        field: field.to_string(),
        action,
        old,
        new,
        confidence: Some(confidence),
    });
}
