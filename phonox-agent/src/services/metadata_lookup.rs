//! Metadata provider lookup
//!
//! Dispatches Discogs and MusicBrainz concurrently, each under its own
//! per-call timeout and the stage's combined budget. Failures and empty
//! results are never fatal: evidence is appended only for the providers
//! that produced a hit, in fixed provider order (discogs, musicbrainz) so
//! the confidence computation is deterministic regardless of completion
//! timing.

use crate::error::PortError;
use crate::ports::{DiscogsPort, MusicBrainzPort};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::types::{
    AggregatedMetadata, DiscogsHit, Evidence, EvidenceSource, LookupOutcome, MusicBrainzHit,
};
use phonox_common::{AgentConfig, Clock};
use std::sync::Arc;
use std::time::Duration;

/// Confidence for an exact Discogs barcode match
const DISCOGS_BARCODE_CONFIDENCE: f64 = 0.95;
/// Confidence for an exact MusicBrainz match
const MUSICBRAINZ_EXACT_CONFIDENCE: f64 = 0.80;
/// Confidence for a partial MusicBrainz match
const MUSICBRAINZ_PARTIAL_CONFIDENCE: f64 = 0.65;

/// Monotone mapping from Discogs fuzzy relevance to evidence confidence.
///
/// Linear over relevance in [0, 1], clamped to [0.55, 0.85]. Pinned by test;
/// change the constants and the gate arithmetic shifts everywhere.
pub fn relevance_to_confidence(relevance: f64) -> f64 {
    (0.55 + 0.30 * relevance.clamp(0.0, 1.0)).clamp(0.55, 0.85)
}

/// Output of the lookup stage
#[derive(Debug, Default)]
pub struct LookupResult {
    pub outcome: LookupOutcome,
    pub evidence: Vec<Evidence>,
}

/// Lookup stage: parallel provider fan-out
pub struct MetadataLookup {
    discogs: Arc<dyn DiscogsPort>,
    musicbrainz: Arc<dyn MusicBrainzPort>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    budget: Duration,
    retry: RetryPolicy,
}

impl MetadataLookup {
    pub fn new(
        discogs: Arc<dyn DiscogsPort>,
        musicbrainz: Arc<dyn MusicBrainzPort>,
        clock: Arc<dyn Clock>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            discogs,
            musicbrainz,
            clock,
            call_timeout: config.metadata_timeout(),
            budget: config.metadata_budget(),
            retry: RetryPolicy::default(),
        }
    }

    /// Query both providers; best-effort, never fails the run
    pub async fn lookup(&self, metadata: &AggregatedMetadata) -> LookupResult {
        let discogs_future = tokio::time::timeout(self.budget, self.query_discogs(metadata));
        let musicbrainz_future =
            tokio::time::timeout(self.budget, self.query_musicbrainz(metadata));

        let (discogs, musicbrainz) = tokio::join!(discogs_future, musicbrainz_future);
        let discogs = discogs.unwrap_or_else(|_| {
            tracing::warn!("Discogs lookup exceeded stage budget");
            None
        });
        let musicbrainz = musicbrainz.unwrap_or_else(|_| {
            tracing::warn!("MusicBrainz lookup exceeded stage budget");
            None
        });

        let mut result = LookupResult::default();

        // Fixed provider order keeps evidence chains deterministic
        if let Some((hits, confidence, match_kind)) = discogs {
            let best = hits.first().cloned().unwrap_or_default();
            result.outcome.spotify_url = best.spotify_url.clone();
            let data = serde_json::json!({
                "match": match_kind,
                "artist": best.artist,
                "title": best.title,
                "year": best.year,
                "label": best.label,
                "catalog_number": best.catalog_number,
                "barcode": best.barcode,
                "genres": best.genres,
                "spotify_url": best.spotify_url,
                "hit_count": hits.len(),
            });
            result.evidence.push(Evidence::new(
                EvidenceSource::Discogs,
                confidence,
                data,
                self.clock.now(),
            ));
            result.outcome.discogs_hits = hits;
        }

        if let Some((hits, confidence)) = musicbrainz {
            let best = hits.first().cloned().unwrap_or_default();
            let data = serde_json::json!({
                "artist": best.artist,
                "title": best.title,
                "year": best.year,
                "label": best.label,
                "catalog_number": best.catalog_number,
                "exact": best.exact,
                "hit_count": hits.len(),
            });
            result.evidence.push(Evidence::new(
                EvidenceSource::MusicBrainz,
                confidence,
                data,
                self.clock.now(),
            ));
            result.outcome.musicbrainz_hits = hits;
        }

        result
    }

    /// Barcode exact lookup when possible, fuzzy (artist, title) otherwise
    async fn query_discogs(
        &self,
        metadata: &AggregatedMetadata,
    ) -> Option<(Vec<DiscogsHit>, f64, &'static str)> {
        if let Some(barcode) = metadata.barcode.as_deref() {
            match self.discogs_call(|| self.discogs.by_barcode(barcode)).await {
                Ok(hits) if !hits.is_empty() => {
                    return Some((hits, DISCOGS_BARCODE_CONFIDENCE, "barcode"));
                }
                Ok(_) => {
                    tracing::debug!(barcode, "Discogs barcode lookup returned no hits");
                }
                Err(err) => {
                    tracing::warn!(barcode, error = %err, "Discogs barcode lookup failed");
                }
            }
        }

        let (artist, title) = match (metadata.artist.as_deref(), metadata.title.as_deref()) {
            (Some(artist), Some(title)) => (artist, title),
            _ => return None,
        };
        match self.discogs_call(|| self.discogs.search(artist, title)).await {
            Ok(hits) if !hits.is_empty() => {
                let best_relevance = hits
                    .iter()
                    .map(|h| h.relevance)
                    .fold(f64::NEG_INFINITY, f64::max);
                Some((hits, relevance_to_confidence(best_relevance), "fuzzy"))
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(artist, title, error = %err, "Discogs search failed");
                None
            }
        }
    }

    async fn discogs_call<F, Fut>(&self, op: F) -> Result<Vec<DiscogsHit>, PortError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<DiscogsHit>, PortError>>,
    {
        call_with_retry("discogs", self.call_timeout, &self.retry, op).await
    }

    /// (artist, title) query with optional catalog-number filter; falls back
    /// to a catalog-number-only query for barcode/spine-only runs
    async fn query_musicbrainz(
        &self,
        metadata: &AggregatedMetadata,
    ) -> Option<(Vec<MusicBrainzHit>, f64)> {
        let artist = metadata.artist.as_deref();
        let title = metadata.title.as_deref();
        let catalog_number = metadata.catalog_number.as_deref();
        if artist.is_none() && title.is_none() && catalog_number.is_none() {
            return None;
        }

        let outcome = call_with_retry("musicbrainz", self.call_timeout, &self.retry, || {
            self.musicbrainz.search(
                artist.unwrap_or_default(),
                title.unwrap_or_default(),
                catalog_number,
            )
        })
        .await;

        match outcome {
            Ok(hits) if !hits.is_empty() => {
                let confidence = if hits.iter().any(|h| h.exact) {
                    MUSICBRAINZ_EXACT_CONFIDENCE
                } else {
                    MUSICBRAINZ_PARTIAL_CONFIDENCE
                };
                Some((hits, confidence))
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "MusicBrainz search failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use phonox_common::SystemClock;

    #[test]
    fn relevance_mapping_is_pinned() {
        assert_eq!(relevance_to_confidence(0.0), 0.55);
        assert_eq!(relevance_to_confidence(1.0), 0.85);
        assert!((relevance_to_confidence(0.5) - 0.70).abs() < 1e-9);
        // Clamped outside the unit interval
        assert_eq!(relevance_to_confidence(-1.0), 0.55);
        assert_eq!(relevance_to_confidence(2.0), 0.85);
    }

    #[test]
    fn relevance_mapping_is_monotone() {
        let mut previous = relevance_to_confidence(0.0);
        for step in 1..=20 {
            let next = relevance_to_confidence(step as f64 / 20.0);
            assert!(next >= previous);
            previous = next;
        }
    }

    struct FakeDiscogs {
        barcode_hits: Vec<DiscogsHit>,
        search_hits: Vec<DiscogsHit>,
    }

    #[async_trait]
    impl DiscogsPort for FakeDiscogs {
        async fn by_barcode(&self, _barcode: &str) -> Result<Vec<DiscogsHit>, PortError> {
            Ok(self.barcode_hits.clone())
        }
        async fn search(&self, _artist: &str, _title: &str) -> Result<Vec<DiscogsHit>, PortError> {
            Ok(self.search_hits.clone())
        }
    }

    struct FakeMusicBrainz {
        hits: Vec<MusicBrainzHit>,
    }

    #[async_trait]
    impl MusicBrainzPort for FakeMusicBrainz {
        async fn search(
            &self,
            _artist: &str,
            _title: &str,
            _catalog_number: Option<&str>,
        ) -> Result<Vec<MusicBrainzHit>, PortError> {
            Ok(self.hits.clone())
        }
    }

    fn lookup_with(
        discogs: FakeDiscogs,
        musicbrainz: FakeMusicBrainz,
    ) -> MetadataLookup {
        MetadataLookup::new(
            Arc::new(discogs),
            Arc::new(musicbrainz),
            Arc::new(SystemClock),
            &AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn barcode_match_scores_high_and_carries_spotify_url() {
        let lookup = lookup_with(
            FakeDiscogs {
                barcode_hits: vec![DiscogsHit {
                    artist: Some("Ghost".to_string()),
                    title: Some("Impera".to_string()),
                    spotify_url: Some("https://open.spotify.com/album/x".to_string()),
                    relevance: 1.0,
                    ..DiscogsHit::default()
                }],
                search_hits: vec![],
            },
            FakeMusicBrainz { hits: vec![] },
        );
        let metadata = AggregatedMetadata {
            barcode: Some("6024550124011".to_string()),
            ..AggregatedMetadata::default()
        };
        let result = lookup.lookup(&metadata).await;
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].source, EvidenceSource::Discogs);
        assert_eq!(result.evidence[0].confidence, 0.95);
        assert_eq!(
            result.outcome.spotify_url.as_deref(),
            Some("https://open.spotify.com/album/x")
        );
    }

    #[tokio::test]
    async fn evidence_order_is_discogs_then_musicbrainz() {
        let lookup = lookup_with(
            FakeDiscogs {
                barcode_hits: vec![],
                search_hits: vec![DiscogsHit {
                    relevance: 1.0,
                    ..DiscogsHit::default()
                }],
            },
            FakeMusicBrainz {
                hits: vec![MusicBrainzHit {
                    exact: true,
                    ..MusicBrainzHit::default()
                }],
            },
        );
        let metadata = AggregatedMetadata {
            artist: Some("Danzig".to_string()),
            title: Some("Danzig".to_string()),
            ..AggregatedMetadata::default()
        };
        let result = lookup.lookup(&metadata).await;
        let sources: Vec<&str> = result.evidence.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["discogs", "musicbrainz"]);
        assert_eq!(result.evidence[0].confidence, 0.85);
        assert_eq!(result.evidence[1].confidence, 0.80);
    }

    #[tokio::test]
    async fn empty_results_append_no_evidence() {
        let lookup = lookup_with(
            FakeDiscogs {
                barcode_hits: vec![],
                search_hits: vec![],
            },
            FakeMusicBrainz { hits: vec![] },
        );
        let metadata = AggregatedMetadata {
            artist: Some("Nobody".to_string()),
            title: Some("Nothing".to_string()),
            ..AggregatedMetadata::default()
        };
        let result = lookup.lookup(&metadata).await;
        assert!(result.evidence.is_empty());
    }

    #[tokio::test]
    async fn partial_musicbrainz_match_scores_lower() {
        let lookup = lookup_with(
            FakeDiscogs {
                barcode_hits: vec![],
                search_hits: vec![],
            },
            FakeMusicBrainz {
                hits: vec![MusicBrainzHit {
                    exact: false,
                    ..MusicBrainzHit::default()
                }],
            },
        );
        let metadata = AggregatedMetadata {
            artist: Some("Danzig".to_string()),
            title: Some("Lucifuge".to_string()),
            ..AggregatedMetadata::default()
        };
        let result = lookup.lookup(&metadata).await;
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].confidence, 0.65);
    }
}
