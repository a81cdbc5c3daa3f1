//! Ports to external collaborators
//!
//! Every external dependency of the pipeline is a trait so a substitute or a
//! deterministic fake can be injected for tests. Concrete implementations
//! live under `clients/`.

use crate::error::PortError;
use crate::types::{DiscogsHit, ImageInput, MetadataProposal, MusicBrainzHit, SearchHit};
use async_trait::async_trait;
use std::time::Duration;

/// Which prompt the vision call uses, keyed on image position
///
/// The first image is assumed to be front-cover optics (artist/title
/// priority); later images are back/spine/label shots (barcode, catalog
/// number, label, condition cues).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    FrontCover,
    DetailShot,
}

/// Multimodal vision model producing one metadata proposal per image
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Analyze one image. `prior` carries proposals from earlier images so
    /// detail shots do not re-infer what the cover already established.
    async fn extract(
        &self,
        image: &ImageInput,
        variant: PromptVariant,
        prior: &[MetadataProposal],
        model: &str,
    ) -> Result<MetadataProposal, PortError>;
}

/// Text completion model used by aggregation, valuation and enhancement
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, PortError>;
}

/// Discogs database queries
#[async_trait]
pub trait DiscogsPort: Send + Sync {
    /// Exact barcode lookup
    async fn by_barcode(&self, barcode: &str) -> Result<Vec<DiscogsHit>, PortError>;

    /// Fuzzy search over artist and title
    async fn search(&self, artist: &str, title: &str) -> Result<Vec<DiscogsHit>, PortError>;
}

/// MusicBrainz release search
#[async_trait]
pub trait MusicBrainzPort: Send + Sync {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        catalog_number: Option<&str>,
    ) -> Result<Vec<MusicBrainzHit>, PortError>;
}

/// Web search across both providers
#[async_trait]
pub trait SearchPort: Send + Sync {
    /// Primary provider; `include_domains` empty means unrestricted
    async fn tavily(
        &self,
        query: &str,
        include_domains: &[&str],
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError>;

    /// Keyless fallback provider
    async fn duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError>;
}

/// Bounded page-body fetch for search-result enrichment
#[async_trait]
pub trait ScraperPort: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, PortError>;
}
