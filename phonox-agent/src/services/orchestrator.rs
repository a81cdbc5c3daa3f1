//! Identification run orchestrator
//!
//! # Stage Progression
//! VALIDATE → VISION → AGGREGATE → LOOKUP → GATE → WEBSEARCH? → VALUATE?
//!
//! The pipeline is a fixed stage sequence over a single mutable run state.
//! Two stages carry skip predicates: web search runs only while the gated
//! confidence sits below the fallback trigger (or the caller forced
//! enrichment), and valuation runs only once the aggregate knows at least an
//! artist and a title. Stage outputs are patches; only this orchestrator
//! mutates the run state, and evidence lands in stage-completion order with
//! intra-stage entries in input order.
//!
//! Every run carries a deadline. Exhaustion between stages terminates the
//! run as failed with `deadline_exceeded`, preserving the evidence gathered
//! so far.

use crate::error::AgentError;
use crate::ports::{
    DiscogsPort, LlmClient, MusicBrainzPort, ScraperPort, SearchPort, VisionClient,
};
use crate::services::confidence_gate;
use crate::services::enhancer;
use crate::services::image_validator::ImageValidator;
use crate::services::metadata_lookup::MetadataLookup;
use crate::services::valuator::Valuator;
use crate::services::vision_aggregator::VisionAggregator;
use crate::services::vision_extractor::VisionExtractor;
use crate::services::web_search::WebSearch;
use crate::types::{
    AggregatedMetadata, ChangeLogEntry, Evidence, GateDecision, ImageInput, RunResult, RunState,
    RunStatus, StoredRecord,
};
use chrono::Datelike;
use phonox_common::{AgentConfig, Clock};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ceiling on a single vision call
const VISION_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Ceiling on a single text-completion call
const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the host must supply for the agent to run
#[derive(Clone)]
pub struct AgentPorts {
    pub vision: Arc<dyn VisionClient>,
    pub llm: Arc<dyn LlmClient>,
    pub discogs: Arc<dyn DiscogsPort>,
    pub musicbrainz: Arc<dyn MusicBrainzPort>,
    pub search: Arc<dyn SearchPort>,
    pub scraper: Arc<dyn ScraperPort>,
}

/// Per-call options for an identify run
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifyOptions {
    /// Run web search even when the confidence gate would skip it
    pub force_enrichment: bool,
}

/// Remaining wall-time budget for one run
struct RunBudget {
    deadline: Instant,
}

impl RunBudget {
    fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
        }
    }

    /// Time left, `None` once the deadline passed
    fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        (now < self.deadline).then(|| self.deadline - now)
    }

    /// Per-call timeout bounded by the remaining budget
    fn call_timeout(&self, preferred: Duration) -> Option<Duration> {
        self.remaining().map(|left| left.min(preferred))
    }
}

/// The identification and valuation agent
pub struct Agent {
    config: AgentConfig,
    clock: Arc<dyn Clock>,
    validator: ImageValidator,
    vision: VisionExtractor,
    aggregator: VisionAggregator,
    lookup: MetadataLookup,
    websearch: WebSearch,
    valuator: Valuator,
}

impl Agent {
    pub fn new(config: AgentConfig, clock: Arc<dyn Clock>, ports: AgentPorts) -> Self {
        let validator = ImageValidator::new(&config);
        let vision = VisionExtractor::new(ports.vision, Arc::clone(&clock), &config);
        let aggregator = VisionAggregator::new(Arc::clone(&ports.llm), &config);
        let lookup = MetadataLookup::new(
            ports.discogs,
            ports.musicbrainz,
            Arc::clone(&clock),
            &config,
        );
        let websearch = WebSearch::new(ports.search, ports.scraper, Arc::clone(&clock), &config);
        let valuator = Valuator::new(ports.llm, &config);
        Self {
            config,
            clock,
            validator,
            vision,
            aggregator,
            lookup,
            websearch,
            valuator,
        }
    }

    /// First-time identification of a record from its photographs
    pub async fn identify(&self, images: Vec<ImageInput>) -> RunResult {
        self.identify_with(images, IdentifyOptions::default()).await
    }

    /// Identification with explicit options
    pub async fn identify_with(
        &self,
        images: Vec<ImageInput>,
        options: IdentifyOptions,
    ) -> RunResult {
        let budget = RunBudget::new(self.config.identify_deadline());
        let mut state = RunState::new(images);
        tracing::info!(
            run_id = %state.run_id,
            images = state.images.len(),
            "Identification run starting"
        );

        // VALIDATE
        if let Err(err) = self.validator.validate(&state.images) {
            return finish_failed(state, &err);
        }
        state.validation_passed = true;

        // VISION - per-image fan-out
        let Some(call_timeout) = budget.call_timeout(VISION_CALL_TIMEOUT) else {
            return finish_failed(state, &AgentError::DeadlineExceeded);
        };
        let extraction = self.vision.extract_all(&state.images, call_timeout).await;
        for evidence in extraction.evidence {
            state.push_evidence(evidence);
        }

        // AGGREGATE
        let Some(call_timeout) = budget.call_timeout(LLM_CALL_TIMEOUT) else {
            return finish_failed(state, &AgentError::DeadlineExceeded);
        };
        let mut aggregated = self
            .aggregator
            .aggregate(
                &extraction.proposals,
                self.clock.now().year(),
                call_timeout,
            )
            .await;
        aggregated.processed_images = extraction.processed_images;
        if aggregated.is_empty() || aggregated.confidence == 0.0 {
            state.vision_extraction = Some(aggregated);
            return finish_failed(state, &AgentError::EmptyVision);
        }
        state.vision_extraction = Some(aggregated);

        // LOOKUP - parallel provider fan-out, best-effort
        if budget.remaining().is_none() {
            return finish_failed(state, &AgentError::DeadlineExceeded);
        }
        let metadata = state
            .vision_extraction
            .as_ref()
            .cloned()
            .unwrap_or_default();
        let lookup = self.lookup.lookup(&metadata).await;
        for evidence in lookup.evidence {
            state.push_evidence(evidence);
        }
        if let Some(meta) = state.vision_extraction.as_mut() {
            if meta.spotify_url.is_none() {
                meta.spotify_url = lookup.outcome.spotify_url.clone();
            }
        }
        state.metadata_lookup = Some(lookup.outcome);

        // GATE
        let decision_score = confidence_gate::score(&state.evidence_chain);
        apply_decision(&mut state, decision_score);
        tracing::info!(
            run_id = %state.run_id,
            confidence = state.confidence,
            "Confidence after metadata lookup"
        );

        // WEBSEARCH - skip predicate: confidence below the fallback trigger
        let websearch_needed =
            options.force_enrichment || state.confidence < self.config.confidence_fallback_trigger;
        if websearch_needed {
            if budget.remaining().is_none() {
                return finish_failed(state, &AgentError::DeadlineExceeded);
            }
            let metadata = state
                .vision_extraction
                .as_ref()
                .cloned()
                .unwrap_or_default();
            if let Some((outcome, evidence)) = self.websearch.run(&metadata).await {
                state.push_evidence(evidence);
                state.websearch_results = Some(outcome);
                let decision_score = confidence_gate::score(&state.evidence_chain);
                apply_decision(&mut state, decision_score);
            }
        }

        // VALUATE - skip predicate: artist and title both known
        let valuation_ready = state
            .vision_extraction
            .as_ref()
            .is_some_and(|m| m.has_artist_and_title());
        if valuation_ready {
            let Some(call_timeout) = budget.call_timeout(LLM_CALL_TIMEOUT) else {
                return finish_failed(state, &AgentError::DeadlineExceeded);
            };
            let metadata = state
                .vision_extraction
                .as_ref()
                .cloned()
                .unwrap_or_default();
            let valuation = self
                .valuator
                .evaluate(&metadata, state.websearch_results.as_ref(), call_timeout)
                .await;
            // Replaces, never accumulates
            state.valuation = Some(valuation);
        }

        let status = if state.auto_commit {
            RunStatus::Complete
        } else {
            RunStatus::Analyzed
        };
        tracing::info!(
            run_id = %state.run_id,
            status = status.as_str(),
            confidence = state.confidence,
            auto_commit = state.auto_commit,
            evidence_entries = state.evidence_chain.len(),
            "Identification run finished"
        );
        RunResult { state, status }
    }

    /// Incremental re-analysis: new images only, merged into the existing
    /// record via the enhancer. Fields the images cannot re-derive (notably
    /// `spotify_url`) are preserved from the existing record.
    pub async fn reanalyze(
        &self,
        existing: &StoredRecord,
        new_images: Vec<ImageInput>,
    ) -> RunResult {
        let budget = RunBudget::new(self.config.reanalyze_deadline());
        let mut state = RunState::new(new_images);
        tracing::info!(
            run_id = %state.run_id,
            record_id = %existing.id,
            new_images = state.images.len(),
            "Re-analysis run starting"
        );

        if let Err(err) = self.validator.validate(&state.images) {
            return finish_failed(state, &err);
        }
        state.validation_passed = true;

        let Some(call_timeout) = budget.call_timeout(VISION_CALL_TIMEOUT) else {
            return finish_failed(state, &AgentError::DeadlineExceeded);
        };
        let extraction = self.vision.extract_all(&state.images, call_timeout).await;
        for evidence in extraction.evidence {
            state.push_evidence(evidence);
        }

        let Some(call_timeout) = budget.call_timeout(LLM_CALL_TIMEOUT) else {
            return finish_failed(state, &AgentError::DeadlineExceeded);
        };
        let mut fresh = self
            .aggregator
            .aggregate(
                &extraction.proposals,
                self.clock.now().year(),
                call_timeout,
            )
            .await;
        fresh.processed_images = extraction.processed_images;
        if fresh.is_empty() || fresh.confidence == 0.0 {
            state.vision_extraction = Some(fresh);
            return finish_failed(state, &AgentError::EmptyVision);
        }

        // Merge without regression; confidence is the enhancer's, not a
        // recomputation from scratch.
        let (merged, confidence, change_log) =
            enhancer::enhance(&existing.metadata, &fresh, existing.confidence);
        state.vision_extraction = Some(merged);
        state.change_log = change_log;
        apply_decision(&mut state, confidence_gate::route(confidence));

        let status = if state.auto_commit {
            RunStatus::Complete
        } else {
            RunStatus::Analyzed
        };
        tracing::info!(
            run_id = %state.run_id,
            record_id = %existing.id,
            status = status.as_str(),
            confidence = state.confidence,
            changes = state.change_log.len(),
            "Re-analysis run finished"
        );
        RunResult { state, status }
    }

    /// Gate exposure for audit and testing
    pub fn score(&self, evidence: &[Evidence]) -> GateDecision {
        confidence_gate::score(evidence)
    }

    /// Enhancer exposure for audit and testing
    pub fn enhance(
        &self,
        existing: &AggregatedMetadata,
        new_proposal: &AggregatedMetadata,
        existing_confidence: f64,
    ) -> (AggregatedMetadata, f64, Vec<ChangeLogEntry>) {
        enhancer::enhance(existing, new_proposal, existing_confidence)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

fn apply_decision(state: &mut RunState, decision: GateDecision) {
    state.confidence = decision.confidence;
    state.auto_commit = decision.auto_commit;
    state.needs_review = decision.needs_review;
    state.review_reason = decision.review_reason;
}

/// Freeze a failed run, preserving the evidence accumulated so far
fn finish_failed(mut state: RunState, err: &AgentError) -> RunResult {
    let error = match err {
        AgentError::EmptyVision | AgentError::DeadlineExceeded => err.label().to_string(),
        AgentError::Validation(msg) => format!("validation_error: {}", msg),
        other => format!("{}: {}", other.label(), other),
    };
    tracing::warn!(
        run_id = %state.run_id,
        error = %error,
        evidence_entries = state.evidence_chain.len(),
        "Run failed"
    );
    state.error = Some(error);
    state.auto_commit = false;
    state.needs_review = true;
    RunResult {
        state,
        status: RunStatus::Failed,
    }
}
