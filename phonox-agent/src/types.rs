//! Shared types and data contracts for the identification pipeline
//!
//! Defines the explicit contracts between pipeline stages: per-image
//! metadata proposals, the multi-image aggregate, the append-only evidence
//! chain, the run state owned by the orchestrator, and the stored-record
//! view consumed by re-analysis.

use chrono::{DateTime, Utc};
use phonox_common::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Evidence
// ============================================================================

/// Source of one piece of evidence
///
/// The six canonical tags are wire-level: downstream persistence indexes on
/// the exact strings. `Other` covers host-supplied sources outside the
/// canonical set; the gate weights them at 0.10.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EvidenceSource {
    Vision,
    Discogs,
    MusicBrainz,
    WebSearch,
    Image,
    UserInput,
    Other(String),
}

impl EvidenceSource {
    /// Wire tag for this source
    pub fn as_str(&self) -> &str {
        match self {
            EvidenceSource::Vision => "vision",
            EvidenceSource::Discogs => "discogs",
            EvidenceSource::MusicBrainz => "musicbrainz",
            EvidenceSource::WebSearch => "websearch",
            EvidenceSource::Image => "image",
            EvidenceSource::UserInput => "user_input",
            EvidenceSource::Other(tag) => tag,
        }
    }

    /// Gate weight for this source
    ///
    /// The canonical six-source table sums to exactly 1.0 (pinned by test).
    pub fn weight(&self) -> f64 {
        match self {
            EvidenceSource::Discogs => 0.40,
            EvidenceSource::MusicBrainz => 0.20,
            EvidenceSource::Vision => 0.18,
            EvidenceSource::WebSearch => 0.12,
            EvidenceSource::Image => 0.05,
            EvidenceSource::UserInput => 0.05,
            EvidenceSource::Other(_) => 0.10,
        }
    }

    /// The canonical source set, in weight order
    pub fn canonical() -> [EvidenceSource; 6] {
        [
            EvidenceSource::Discogs,
            EvidenceSource::MusicBrainz,
            EvidenceSource::Vision,
            EvidenceSource::WebSearch,
            EvidenceSource::Image,
            EvidenceSource::UserInput,
        ]
    }
}

impl From<EvidenceSource> for String {
    fn from(s: EvidenceSource) -> String {
        s.as_str().to_string()
    }
}

impl From<String> for EvidenceSource {
    fn from(s: String) -> EvidenceSource {
        match s.as_str() {
            "vision" => EvidenceSource::Vision,
            "discogs" => EvidenceSource::Discogs,
            "musicbrainz" => EvidenceSource::MusicBrainz,
            "websearch" => EvidenceSource::WebSearch,
            "image" => EvidenceSource::Image,
            "user_input" => EvidenceSource::UserInput,
            _ => EvidenceSource::Other(s),
        }
    }
}

/// One datum contributed by a source
///
/// Contract: evidence is append-only within a run and never mutated after
/// append; chain order is production order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Opaque map of the source's fields
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Evidence {
    pub fn new(
        source: EvidenceSource,
        confidence: f64,
        data: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            confidence: confidence.clamp(0.0, 1.0),
            data,
            timestamp,
        }
    }
}

// ============================================================================
// Proposals and aggregation
// ============================================================================

/// A single source's opinion of a record's fields, with self-reported
/// confidence. Any field may be null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataProposal {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub label: Option<String>,
    /// Pressing catalog number; never holds barcode digits
    pub catalog_number: Option<String>,
    /// 12-13 digit string, distinct from catalog_number
    pub barcode: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    pub condition: Option<Condition>,
    pub condition_notes: Option<String>,
}

impl MetadataProposal {
    /// Count of populated fields; weights the aggregation confidence
    pub fn non_null_fields(&self) -> usize {
        let mut count = 0;
        count += self.artist.is_some() as usize;
        count += self.title.is_some() as usize;
        count += self.year.is_some() as usize;
        count += self.label.is_some() as usize;
        count += self.catalog_number.is_some() as usize;
        count += self.barcode.is_some() as usize;
        count += (!self.genres.is_empty()) as usize;
        count += self.condition.is_some() as usize;
        count
    }

    pub fn is_empty(&self) -> bool {
        self.non_null_fields() == 0
    }
}

/// A per-image proposal tagged with its image position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProposal {
    pub image_index: usize,
    pub proposal: MetadataProposal,
}

/// Merger of all per-image proposals with deterministic tie-breaking and
/// pessimistic condition handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub barcode: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub confidence: f64,
    pub condition: Option<Condition>,
    pub condition_notes: Option<String>,
    /// Link to the release on Spotify; supplied by lookup enrichment or a
    /// prior record, never by vision
    pub spotify_url: Option<String>,
    /// Index of the dominant proposal
    pub image_index: usize,
    /// De-duplicated union of barcodes across proposals, most frequent first
    #[serde(default)]
    pub all_barcodes: Vec<String>,
    /// De-duplicated union of catalog numbers, most frequent first
    #[serde(default)]
    pub all_catalog_numbers: Vec<String>,
    pub processed_images: usize,
    /// All per-image proposals, retained verbatim for audit
    #[serde(default)]
    pub image_results: Vec<ImageProposal>,
}

impl AggregatedMetadata {
    pub fn non_null_fields(&self) -> usize {
        let mut count = 0;
        count += self.artist.is_some() as usize;
        count += self.title.is_some() as usize;
        count += self.year.is_some() as usize;
        count += self.label.is_some() as usize;
        count += self.catalog_number.is_some() as usize;
        count += self.barcode.is_some() as usize;
        count += (!self.genres.is_empty()) as usize;
        count += self.condition.is_some() as usize;
        count
    }

    pub fn is_empty(&self) -> bool {
        self.non_null_fields() == 0
    }

    /// Valuation requires at least an artist and a title
    pub fn has_artist_and_title(&self) -> bool {
        self.artist.is_some() && self.title.is_some()
    }
}

// ============================================================================
// Lookup and search outcomes
// ============================================================================

/// Discogs hit shaped for the pipeline (not the raw API form)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscogsHit {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub barcode: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    /// Provider relevance in [0, 1]; mapped to confidence by a pinned
    /// monotone function
    pub relevance: f64,
    pub spotify_url: Option<String>,
}

/// MusicBrainz hit shaped for the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicBrainzHit {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    /// Provider score in [0, 1]
    pub score: f64,
    /// Exact artist+title match
    pub exact: bool,
}

/// Outcome of the metadata lookup stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupOutcome {
    #[serde(default)]
    pub discogs_hits: Vec<DiscogsHit>,
    #[serde(default)]
    pub musicbrainz_hits: Vec<MusicBrainzHit>,
    pub spotify_url: Option<String>,
}

/// One web search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Excerpt scraped from a result page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub excerpt: String,
}

/// Which provider ultimately produced the hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    Tavily,
    DuckDuckGo,
}

/// Outcome of the web search stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchOutcome {
    pub query: String,
    pub provider: SearchProviderKind,
    pub hits: Vec<SearchHit>,
    pub scraped: Vec<ScrapedPage>,
}

// ============================================================================
// Valuation
// ============================================================================

/// Market posture reported by the valuation analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCondition {
    Strong,
    #[default]
    Stable,
    Weak,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::Strong => "strong",
            MarketCondition::Stable => "stable",
            MarketCondition::Weak => "weak",
        }
    }
}

/// Valuation output; all-null when the search yielded nothing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub estimated_value_eur: Option<f64>,
    pub price_range_min: Option<f64>,
    pub price_range_max: Option<f64>,
    pub market_condition: Option<MarketCondition>,
    #[serde(default)]
    pub factors: Vec<String>,
    pub explanation: Option<String>,
}

impl Valuation {
    /// The nullable valuation returned instead of a guessed value
    pub fn null() -> Self {
        Self::default()
    }
}

// ============================================================================
// Gate decision and change log
// ============================================================================

/// Pure output of the confidence gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub confidence: f64,
    pub auto_commit: bool,
    pub needs_review: bool,
    pub review_reason: Option<String>,
}

/// What the enhancer did to one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Added,
    Updated,
    Kept,
    Conflict,
    Boosted,
    EnhancementSkipped,
}

/// Audit entry for one enhancer decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub field: String,
    pub action: ChangeAction,
    pub old: Option<String>,
    pub new: Option<String>,
    pub confidence: Option<f64>,
}

// ============================================================================
// Run state
// ============================================================================

/// One user-supplied image blob with its declared content type
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// Lifecycle status derived from a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Analyzed,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Analyzed => "analyzed",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }
}

/// Mutable record of one pipeline run
///
/// Created at pipeline entry, mutated only by the orchestrator between
/// stages, frozen at pipeline exit. Stages receive a read view and return
/// typed patches.
#[derive(Debug)]
pub struct RunState {
    pub run_id: Uuid,
    pub images: Vec<ImageInput>,
    pub validation_passed: bool,
    pub vision_extraction: Option<AggregatedMetadata>,
    pub metadata_lookup: Option<LookupOutcome>,
    pub websearch_results: Option<WebSearchOutcome>,
    pub valuation: Option<Valuation>,
    pub evidence_chain: Vec<Evidence>,
    pub confidence: f64,
    pub auto_commit: bool,
    pub needs_review: bool,
    pub review_reason: Option<String>,
    /// Change log from re-analysis merges; empty for first-time runs
    pub change_log: Vec<ChangeLogEntry>,
    pub error: Option<String>,
}

impl RunState {
    pub fn new(images: Vec<ImageInput>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            images,
            validation_passed: false,
            vision_extraction: None,
            metadata_lookup: None,
            websearch_results: None,
            valuation: None,
            evidence_chain: Vec::new(),
            confidence: 0.0,
            auto_commit: false,
            needs_review: false,
            review_reason: None,
            change_log: Vec::new(),
            error: None,
        }
    }

    /// Append evidence; entries are never mutated after this point
    pub fn push_evidence(&mut self, evidence: Evidence) {
        self.evidence_chain.push(evidence);
    }
}

/// Final, frozen result of a run
#[derive(Debug)]
pub struct RunResult {
    pub state: RunState,
    pub status: RunStatus,
}

// ============================================================================
// Stored record (read-only view for re-analysis)
// ============================================================================

/// The persisted form of an identified record, as the storage collaborator
/// hands it back. The agent never writes storage; re-analysis returns an
/// updated record for the caller to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub metadata: AggregatedMetadata,
    pub estimated_value_eur: Option<f64>,
    pub user_tag: Option<String>,
    pub confidence: f64,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = EvidenceSource::canonical().iter().map(|s| s.weight()).sum();
        assert!(
            (total - 1.0).abs() < 1e-9,
            "canonical weights must sum to 1.0, got {}",
            total
        );
    }

    #[test]
    fn source_tags_are_wire_stable() {
        assert_eq!(EvidenceSource::Vision.as_str(), "vision");
        assert_eq!(EvidenceSource::Discogs.as_str(), "discogs");
        assert_eq!(EvidenceSource::MusicBrainz.as_str(), "musicbrainz");
        assert_eq!(EvidenceSource::WebSearch.as_str(), "websearch");
        assert_eq!(EvidenceSource::Image.as_str(), "image");
        assert_eq!(EvidenceSource::UserInput.as_str(), "user_input");
    }

    #[test]
    fn source_roundtrips_through_string() {
        for source in EvidenceSource::canonical() {
            let tag: String = source.clone().into();
            assert_eq!(EvidenceSource::from(tag), source);
        }
        assert_eq!(
            EvidenceSource::from("register".to_string()),
            EvidenceSource::Other("register".to_string())
        );
    }

    #[test]
    fn evidence_confidence_is_clamped() {
        let ev = Evidence::new(
            EvidenceSource::Vision,
            1.7,
            serde_json::json!({}),
            Utc::now(),
        );
        assert_eq!(ev.confidence, 1.0);
        let ev = Evidence::new(
            EvidenceSource::Vision,
            -0.2,
            serde_json::json!({}),
            Utc::now(),
        );
        assert_eq!(ev.confidence, 0.0);
    }

    #[test]
    fn proposal_field_count_tracks_population() {
        let mut proposal = MetadataProposal::default();
        assert!(proposal.is_empty());
        proposal.artist = Some("Danzig".to_string());
        proposal.title = Some("Danzig".to_string());
        proposal.genres = vec!["Rock".to_string()];
        assert_eq!(proposal.non_null_fields(), 3);
        assert!(!proposal.is_empty());
    }

    #[test]
    fn vision_proposal_json_field_names() {
        let parsed: MetadataProposal = serde_json::from_str(
            r#"{
                "artist": "Metallica",
                "title": "72 Seasons",
                "year": 2023,
                "label": null,
                "catalog_number": "BLCKND055-1",
                "barcode": "858034001244",
                "genres": ["Metal"],
                "confidence": 0.92,
                "condition": "NM",
                "condition_notes": "light sleeve wear"
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.artist.as_deref(), Some("Metallica"));
        assert_eq!(parsed.barcode.as_deref(), Some("858034001244"));
        assert_eq!(parsed.condition, Some(phonox_common::Condition::Nm));
    }
}
