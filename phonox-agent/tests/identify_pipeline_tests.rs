//! End-to-end identification pipeline tests over deterministic fake ports

mod support;

use phonox_agent::types::{DiscogsHit, MusicBrainzHit, SearchHit};
use phonox_agent::{Agent, AgentPorts, EvidenceSource, MetadataProposal, RunStatus};
use phonox_common::{AgentConfig, Condition};
use std::sync::Arc;
use support::*;

fn danzig_vision(confidence: f64) -> MetadataProposal {
    MetadataProposal {
        artist: Some("Danzig".to_string()),
        title: Some("Danzig".to_string()),
        year: Some(1988),
        label: Some("Def American".to_string()),
        catalog_number: Some("DEF-24208".to_string()),
        confidence,
        ..MetadataProposal::default()
    }
}

fn danzig_discogs_hit() -> DiscogsHit {
    DiscogsHit {
        artist: Some("Danzig".to_string()),
        title: Some("Danzig".to_string()),
        year: Some(1988),
        label: Some("Def American".to_string()),
        catalog_number: Some("DEF 24208".to_string()),
        relevance: 1.0,
        ..DiscogsHit::default()
    }
}

fn exact_mb_hit() -> MusicBrainzHit {
    MusicBrainzHit {
        artist: Some("Danzig".to_string()),
        title: Some("Danzig".to_string()),
        year: Some(2009),
        score: 1.0,
        exact: true,
        ..MusicBrainzHit::default()
    }
}

/// High-confidence single image: strong vision + both providers agree,
/// web search never triggers
#[tokio::test]
async fn high_confidence_single_image_auto_commits() {
    let search = Arc::new(ScriptedSearch::silent());
    let agent = build_agent(
        ScriptedVision::new(vec![("front.jpg", danzig_vision(0.95))]),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs {
            barcode_hits: vec![],
            search_hits: vec![danzig_discogs_hit()],
            fail: false,
        },
        ScriptedMusicBrainz {
            hits: vec![exact_mb_hit()],
            fail: false,
        },
        Arc::clone(&search),
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![jpeg("front.jpg")]).await;

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.state.evidence_chain.len(), 3);
    let sources: Vec<&str> = result
        .state
        .evidence_chain
        .iter()
        .map(|e| e.source.as_str())
        .collect();
    assert_eq!(sources, vec!["vision", "discogs", "musicbrainz"]);
    // (0.95*0.18 + 0.85*0.40 + 0.80*0.20) / 0.78
    assert!((result.state.confidence - 0.8603).abs() < 0.001);
    assert!(result.state.auto_commit);
    assert!(!result.state.needs_review);
    // Confidence never dropped below the fallback trigger: no search calls
    assert!(search.call_log().is_empty());
    // Valuation ran (artist+title known) but had no market evidence
    let valuation = result.state.valuation.as_ref().unwrap();
    assert_eq!(valuation.estimated_value_eur, None);
}

/// Barcode-only back photo: no artist/title, both lookups land on the
/// barcode, no valuation
#[tokio::test]
async fn barcode_only_photo_auto_commits_without_valuation() {
    let vision = MetadataProposal {
        catalog_number: Some("BLCKND055-1".to_string()),
        barcode: Some("6024550124011".to_string()),
        confidence: 0.75,
        ..MetadataProposal::default()
    };
    let search = Arc::new(ScriptedSearch::silent());
    let agent = build_agent(
        ScriptedVision::new(vec![("back.jpg", vision)]),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs {
            barcode_hits: vec![DiscogsHit {
                artist: Some("Ghost".to_string()),
                title: Some("Impera".to_string()),
                barcode: Some("6024550124011".to_string()),
                relevance: 1.0,
                ..DiscogsHit::default()
            }],
            search_hits: vec![],
            fail: false,
        },
        ScriptedMusicBrainz {
            hits: vec![MusicBrainzHit {
                catalog_number: Some("BLCKND055-1".to_string()),
                score: 1.0,
                exact: true,
                ..MusicBrainzHit::default()
            }],
            fail: false,
        },
        Arc::clone(&search),
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![jpeg("back.jpg")]).await;

    // (0.75*0.18 + 0.95*0.40 + 0.80*0.20) / 0.78 ≈ 0.865
    assert!(result.state.confidence >= 0.85);
    assert!(result.state.auto_commit);
    assert!(!result.state.needs_review);
    // No artist/title: valuation skipped entirely
    assert!(result.state.valuation.is_none());
    assert_eq!(result.status, RunStatus::Complete);
}

/// Multi-image agreement with wear: worst condition wins, barcodes unioned
#[tokio::test]
async fn multi_image_takes_worst_condition() {
    let image1 = MetadataProposal {
        artist: Some("Metallica".to_string()),
        title: Some("72 Seasons".to_string()),
        condition: Some(Condition::Nm),
        confidence: 0.92,
        ..MetadataProposal::default()
    };
    let image2 = MetadataProposal {
        barcode: Some("858034001244".to_string()),
        condition: Some(Condition::VgPlus),
        confidence: 0.85,
        ..MetadataProposal::default()
    };
    let image3 = MetadataProposal {
        condition: Some(Condition::Vg),
        confidence: 0.80,
        ..MetadataProposal::default()
    };

    let search = Arc::new(ScriptedSearch::silent());
    let agent = build_agent(
        ScriptedVision::new(vec![
            ("front.jpg", image1),
            ("back.jpg", image2),
            ("disc.jpg", image3),
        ]),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs {
            barcode_hits: vec![DiscogsHit {
                artist: Some("Metallica".to_string()),
                title: Some("72 Seasons".to_string()),
                barcode: Some("858034001244".to_string()),
                relevance: 1.0,
                ..DiscogsHit::default()
            }],
            search_hits: vec![],
            fail: false,
        },
        ScriptedMusicBrainz {
            hits: vec![MusicBrainzHit {
                artist: Some("Metallica".to_string()),
                title: Some("72 Seasons".to_string()),
                score: 1.0,
                exact: true,
                ..MusicBrainzHit::default()
            }],
            fail: false,
        },
        Arc::clone(&search),
        ScriptedScraper::empty(),
    );

    let result = agent
        .identify(vec![jpeg("front.jpg"), jpeg("back.jpg"), jpeg("disc.jpg")])
        .await;

    let metadata = result.state.vision_extraction.as_ref().unwrap();
    assert_eq!(metadata.condition, Some(Condition::Vg));
    assert_eq!(metadata.all_barcodes, vec!["858034001244".to_string()]);
    assert_eq!(metadata.artist.as_deref(), Some("Metallica"));
    assert!(result.state.auto_commit);
}

/// Low confidence triggers the websearch fallback chain; Tavily outage
/// exercises DuckDuckGo with the cleaned query
#[tokio::test]
async fn low_confidence_falls_back_to_duckduckgo() {
    let search = Arc::new(ScriptedSearch {
        tavily_down: true,
        tavily_restricted_hits: vec![],
        tavily_open_hits: vec![],
        ddg_hits: vec![SearchHit {
            title: "Danzig LP price guide".to_string(),
            url: "https://www.discogs.com/sell/release/1".to_string(),
            snippet: "copies around €20".to_string(),
        }],
        calls: std::sync::Mutex::new(Vec::new()),
    });
    let agent = build_agent(
        ScriptedVision::new(vec![("front.jpg", danzig_vision(0.55))]),
        ScriptedLlm::with_response(
            "ESTIMATED_VALUE: €20\nPRICE_RANGE: €15 - €28\nMARKET_CONDITION: weak\nFACTOR: common pressing\nEXPLANATION: plentiful supply.",
        ),
        ScriptedDiscogs::empty(),
        ScriptedMusicBrainz {
            hits: vec![MusicBrainzHit {
                artist: Some("Danzig".to_string()),
                title: Some("Danzig II".to_string()),
                score: 0.7,
                exact: false,
                ..MusicBrainzHit::default()
            }],
            fail: false,
        },
        Arc::clone(&search),
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![jpeg("front.jpg")]).await;

    // Exactly one websearch entry at the fixed 0.60 confidence
    let websearch_entries: Vec<_> = result
        .state
        .evidence_chain
        .iter()
        .filter(|e| e.source == EvidenceSource::WebSearch)
        .collect();
    assert_eq!(websearch_entries.len(), 1);
    assert_eq!(websearch_entries[0].confidence, 0.60);

    // (0.55*0.18 + 0.65*0.20 + 0.60*0.12) / 0.50 ≈ 0.602
    assert!((result.state.confidence - 0.602).abs() < 0.001);
    assert!(result.state.needs_review);
    assert_eq!(
        result.state.review_reason.as_deref(),
        Some("low_confidence_fallback")
    );

    // Tavily was attempted, then the fallback ran with the cleaned query
    // (catalog number stripped)
    let calls = search.call_log();
    assert!(calls[0].starts_with("tavily-restricted:"));
    assert_eq!(
        calls.last().unwrap(),
        "ddg:Danzig Danzig vinyl record price 1988"
    );

    // Valuation anchored on the fallback hits
    let valuation = result.state.valuation.as_ref().unwrap();
    assert_eq!(valuation.estimated_value_eur, Some(20.0));
}

/// Zero hits on the restricted pass retries unrestricted; duplicate URLs
/// collapse to one
#[tokio::test]
async fn unrestricted_retry_deduplicates_urls() {
    let dup = SearchHit {
        title: "listing".to_string(),
        url: "https://example.com/listing".to_string(),
        snippet: String::new(),
    };
    let other = SearchHit {
        title: "other".to_string(),
        url: "https://example.com/other".to_string(),
        snippet: String::new(),
    };
    let search = Arc::new(ScriptedSearch {
        tavily_down: false,
        tavily_restricted_hits: vec![],
        tavily_open_hits: vec![dup.clone(), other.clone(), dup.clone()],
        ddg_hits: vec![],
        calls: std::sync::Mutex::new(Vec::new()),
    });
    let agent = build_agent(
        ScriptedVision::new(vec![("front.jpg", danzig_vision(0.55))]),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs::empty(),
        ScriptedMusicBrainz::empty(),
        Arc::clone(&search),
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![jpeg("front.jpg")]).await;

    let outcome = result.state.websearch_results.as_ref().unwrap();
    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.hits[0].url, "https://example.com/listing");

    let calls = search.call_log();
    assert!(calls[0].starts_with("tavily-restricted:"));
    assert!(calls[1].starts_with("tavily:"));
    assert_eq!(calls.len(), 2);
}

/// All-empty vision output fails the run with the dedicated error
#[tokio::test]
async fn empty_vision_fails_the_run() {
    let search = Arc::new(ScriptedSearch::silent());
    let agent = build_agent(
        ScriptedVision::empty(),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs::empty(),
        ScriptedMusicBrainz::empty(),
        search,
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![jpeg("front.jpg")]).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.state.error.as_deref(), Some("empty_vision"));
    assert!(result.state.evidence_chain.is_empty());
}

/// Validation boundaries: zero images and count overflow are validation
/// errors, not vision failures
#[tokio::test]
async fn image_count_boundaries_are_validation_errors() {
    let search = Arc::new(ScriptedSearch::silent());
    let agent = build_agent(
        ScriptedVision::empty(),
        ScriptedLlm::unavailable(),
        ScriptedDiscogs::empty(),
        ScriptedMusicBrainz::empty(),
        search,
        ScriptedScraper::empty(),
    );

    let result = agent.identify(vec![]).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result
        .state
        .error
        .as_deref()
        .unwrap()
        .starts_with("validation_error"));

    let too_many: Vec<_> = (0..11).map(|i| jpeg(&format!("{}.jpg", i))).collect();
    let result = agent.identify(too_many).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result
        .state
        .error
        .as_deref()
        .unwrap()
        .starts_with("validation_error"));
}

/// Evidence order is deterministic under shuffled completion timing
#[tokio::test]
async fn evidence_order_survives_shuffled_completion() {
    let proposals = vec![
        ("front.jpg", danzig_vision(0.9)),
        (
            "back.jpg",
            MetadataProposal {
                barcode: Some("075992551014".to_string()),
                confidence: 0.8,
                ..MetadataProposal::default()
            },
        ),
        (
            "disc.jpg",
            MetadataProposal {
                condition: Some(Condition::Vg),
                confidence: 0.7,
                ..MetadataProposal::default()
            },
        ),
    ];

    let mut chains = Vec::new();
    for _ in 0..2 {
        let search = Arc::new(ScriptedSearch::silent());
        // Later images finish first; order must not care
        let vision = ScriptedVision::new(proposals.clone())
            .with_delays(vec![("front.jpg", 40), ("back.jpg", 5), ("disc.jpg", 1)]);
        let agent = build_agent(
            vision,
            ScriptedLlm::unavailable(),
            ScriptedDiscogs::empty(),
            ScriptedMusicBrainz::empty(),
            search,
            ScriptedScraper::empty(),
        );
        let result = agent
            .identify(vec![jpeg("front.jpg"), jpeg("back.jpg"), jpeg("disc.jpg")])
            .await;

        let chain: Vec<(String, f64, Option<i64>)> = result
            .state
            .evidence_chain
            .iter()
            .map(|e| {
                (
                    e.source.as_str().to_string(),
                    e.confidence,
                    e.data.get("image_index").and_then(|v| v.as_i64()),
                )
            })
            .collect();
        chains.push(chain);
    }

    assert_eq!(chains[0], chains[1]);
    let image_order: Vec<Option<i64>> = chains[0]
        .iter()
        .filter(|(source, _, _)| source == "vision")
        .map(|(_, _, index)| *index)
        .collect();
    assert_eq!(image_order, vec![Some(0), Some(1), Some(2)]);
}

/// A run past its deadline fails with `deadline_exceeded`, keeping the
/// evidence gathered so far
#[tokio::test]
async fn deadline_exhaustion_fails_the_run() {
    let config = AgentConfig {
        identify_deadline_s: 1,
        vision_retries: 1,
        ..AgentConfig::default()
    };
    let vision = ScriptedVision::new(vec![("front.jpg", danzig_vision(0.9))])
        .with_delays(vec![("front.jpg", 3_000)]);
    let agent = Agent::new(
        config,
        Arc::new(fixed_clock()),
        AgentPorts {
            vision: Arc::new(vision),
            llm: Arc::new(ScriptedLlm::unavailable()),
            discogs: Arc::new(ScriptedDiscogs::empty()),
            musicbrainz: Arc::new(ScriptedMusicBrainz::empty()),
            search: Arc::new(ScriptedSearch::silent()),
            scraper: Arc::new(ScriptedScraper::empty()),
        },
    );

    let result = agent.identify(vec![jpeg("front.jpg")]).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.state.error.as_deref(), Some("deadline_exceeded"));
}
