//! Per-image vision extraction
//!
//! One multimodal call per image, prompt varying with image position: the
//! first image is treated as front-cover optics (artist/title priority),
//! later images as back/spine/label shots (barcode, catalog number, label,
//! condition cues) with the cover's proposal passed as prompt context.
//!
//! The first image is analyzed alone so its proposal can seed the detail
//! prompts; remaining images then fan out concurrently, bounded by a
//! semaphore, and results are reassembled into image order before
//! aggregation.

use crate::error::PortError;
use crate::ports::{PromptVariant, VisionClient};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::types::{Evidence, EvidenceSource, ImageInput, ImageProposal, MetadataProposal};
use futures::future::join_all;
use phonox_common::{AgentConfig, Clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A single image's confidence can never reach certainty
const MAX_SINGLE_IMAGE_CONFIDENCE: f64 = 0.95;

/// Output of the vision stage
#[derive(Debug, Default)]
pub struct VisionExtraction {
    /// Successful per-image proposals, in image order
    pub proposals: Vec<ImageProposal>,
    /// One `vision` evidence entry per successful image, in image order
    pub evidence: Vec<Evidence>,
    /// Number of images attempted (successful or not)
    pub processed_images: usize,
}

/// Vision stage: bounded fan-out over the run's images
pub struct VisionExtractor {
    client: Arc<dyn VisionClient>,
    clock: Arc<dyn Clock>,
    model: String,
    concurrency: usize,
    retry: RetryPolicy,
}

impl VisionExtractor {
    pub fn new(client: Arc<dyn VisionClient>, clock: Arc<dyn Clock>, config: &AgentConfig) -> Self {
        Self {
            client,
            clock,
            model: config.vision_model.clone(),
            concurrency: config.vision_concurrency,
            retry: RetryPolicy::new(config.vision_retries, config.vision_backoff()),
        }
    }

    /// Analyze every image, failing soft per image
    pub async fn extract_all(
        &self,
        images: &[ImageInput],
        call_timeout: Duration,
    ) -> VisionExtraction {
        let mut results: Vec<Option<MetadataProposal>> = vec![None; images.len()];

        // Front cover first: its proposal seeds the detail-shot prompts.
        if let Some(front) = images.first() {
            results[0] = self
                .extract_one(front, 0, PromptVariant::FrontCover, &[], call_timeout)
                .await;
        }

        if images.len() > 1 {
            let prior: Vec<MetadataProposal> = results[0].clone().into_iter().collect();
            let semaphore = Arc::new(Semaphore::new(self.concurrency));

            let tasks = images.iter().enumerate().skip(1).map(|(index, image)| {
                let semaphore = Arc::clone(&semaphore);
                let prior = prior.clone();
                async move {
                    // Semaphore closes only on drop; acquisition cannot fail here
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let proposal = self
                        .extract_one(image, index, PromptVariant::DetailShot, &prior, call_timeout)
                        .await;
                    (index, proposal)
                }
            });

            // join_all preserves task order; evidence below follows image order
            for (index, proposal) in join_all(tasks).await {
                results[index] = proposal;
            }
        }

        let mut extraction = VisionExtraction {
            processed_images: images.len(),
            ..VisionExtraction::default()
        };
        for (index, proposal) in results.into_iter().enumerate() {
            if let Some(proposal) = proposal {
                extraction
                    .evidence
                    .push(self.evidence_for(index, &images[index], &proposal));
                extraction.proposals.push(ImageProposal {
                    image_index: index,
                    proposal,
                });
            }
        }
        extraction
    }

    async fn extract_one(
        &self,
        image: &ImageInput,
        index: usize,
        variant: PromptVariant,
        prior: &[MetadataProposal],
        call_timeout: Duration,
    ) -> Option<MetadataProposal> {
        let call_name = format!("vision[{}]", index);
        let outcome: Result<MetadataProposal, PortError> =
            call_with_retry(&call_name, call_timeout, &self.retry, || {
                self.client.extract(image, variant, prior, &self.model)
            })
            .await;

        match outcome {
            Ok(mut proposal) => {
                proposal.confidence = proposal.confidence.clamp(0.0, MAX_SINGLE_IMAGE_CONFIDENCE);
                tracing::info!(
                    image_index = index,
                    filename = %image.filename,
                    artist = ?proposal.artist,
                    title = ?proposal.title,
                    barcode = ?proposal.barcode,
                    confidence = proposal.confidence,
                    "Vision extraction succeeded"
                );
                Some(proposal)
            }
            Err(err) => {
                // Per-image error isolation: the run continues on what the
                // other images produced.
                tracing::warn!(
                    image_index = index,
                    filename = %image.filename,
                    error = %err,
                    "Vision extraction failed for image"
                );
                None
            }
        }
    }

    fn evidence_for(
        &self,
        index: usize,
        image: &ImageInput,
        proposal: &MetadataProposal,
    ) -> Evidence {
        let mut data = serde_json::to_value(proposal)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        if let Some(map) = data.as_object_mut() {
            map.insert("image_index".to_string(), serde_json::json!(index));
            map.insert("filename".to_string(), serde_json::json!(image.filename));
        }
        Evidence::new(
            EvidenceSource::Vision,
            proposal.confidence,
            data,
            self.clock.now(),
        )
    }
}
