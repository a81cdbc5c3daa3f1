//! Deterministic fake ports and builders shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::TimeZone;
use phonox_agent::ports::{
    DiscogsPort, LlmClient, MusicBrainzPort, PromptVariant, ScraperPort, SearchPort, VisionClient,
};
use phonox_agent::types::{DiscogsHit, MusicBrainzHit, SearchHit};
use phonox_agent::{Agent, AgentPorts, ImageInput, MetadataProposal, PortError};
use phonox_common::{AgentConfig, FixedClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A small JPEG-magic blob with the given filename
pub fn jpeg(name: &str) -> ImageInput {
    ImageInput {
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
        content_type: "image/jpeg".to_string(),
        filename: name.to_string(),
    }
}

/// Vision fake scripted per filename; a missing filename behaves like a
/// model that never produced valid JSON. Optional per-image delays shuffle
/// internal completion timing without touching result order.
pub struct ScriptedVision {
    pub by_filename: HashMap<String, MetadataProposal>,
    pub delay_ms: HashMap<String, u64>,
}

impl ScriptedVision {
    pub fn new(entries: Vec<(&str, MetadataProposal)>) -> Self {
        Self {
            by_filename: entries
                .into_iter()
                .map(|(name, proposal)| (name.to_string(), proposal))
                .collect(),
            delay_ms: HashMap::new(),
        }
    }

    pub fn with_delays(mut self, delays: Vec<(&str, u64)>) -> Self {
        self.delay_ms = delays
            .into_iter()
            .map(|(name, ms)| (name.to_string(), ms))
            .collect();
        self
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn extract(
        &self,
        image: &ImageInput,
        _variant: PromptVariant,
        _prior: &[MetadataProposal],
        _model: &str,
    ) -> Result<MetadataProposal, PortError> {
        if let Some(ms) = self.delay_ms.get(&image.filename) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.by_filename
            .get(&image.filename)
            .cloned()
            .ok_or_else(|| PortError::Parse("model returned no JSON".to_string()))
    }
}

/// LLM fake returning one fixed response, or failing when unscripted
pub struct ScriptedLlm {
    pub response: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn unavailable() -> Self {
        Self {
            response: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(text: &str) -> Self {
        Self {
            response: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, PortError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        self.response
            .clone()
            .ok_or_else(|| PortError::Fatal("LLM unavailable".to_string()))
    }
}

/// Discogs fake with independent barcode and fuzzy scripts
pub struct ScriptedDiscogs {
    pub barcode_hits: Vec<DiscogsHit>,
    pub search_hits: Vec<DiscogsHit>,
    pub fail: bool,
}

impl ScriptedDiscogs {
    pub fn empty() -> Self {
        Self {
            barcode_hits: Vec::new(),
            search_hits: Vec::new(),
            fail: false,
        }
    }
}

#[async_trait]
impl DiscogsPort for ScriptedDiscogs {
    async fn by_barcode(&self, _barcode: &str) -> Result<Vec<DiscogsHit>, PortError> {
        if self.fail {
            return Err(PortError::Fatal("discogs down".to_string()));
        }
        Ok(self.barcode_hits.clone())
    }

    async fn search(&self, _artist: &str, _title: &str) -> Result<Vec<DiscogsHit>, PortError> {
        if self.fail {
            return Err(PortError::Fatal("discogs down".to_string()));
        }
        Ok(self.search_hits.clone())
    }
}

/// MusicBrainz fake
pub struct ScriptedMusicBrainz {
    pub hits: Vec<MusicBrainzHit>,
    pub fail: bool,
}

impl ScriptedMusicBrainz {
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            fail: false,
        }
    }
}

#[async_trait]
impl MusicBrainzPort for ScriptedMusicBrainz {
    async fn search(
        &self,
        _artist: &str,
        _title: &str,
        _catalog_number: Option<&str>,
    ) -> Result<Vec<MusicBrainzHit>, PortError> {
        if self.fail {
            return Err(PortError::Fatal("musicbrainz down".to_string()));
        }
        Ok(self.hits.clone())
    }
}

/// Search fake recording every provider call
pub struct ScriptedSearch {
    pub tavily_down: bool,
    pub tavily_restricted_hits: Vec<SearchHit>,
    pub tavily_open_hits: Vec<SearchHit>,
    pub ddg_hits: Vec<SearchHit>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn silent() -> Self {
        Self {
            tavily_down: false,
            tavily_restricted_hits: Vec::new(),
            tavily_open_hits: Vec::new(),
            ddg_hits: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchPort for ScriptedSearch {
    async fn tavily(
        &self,
        query: &str,
        include_domains: &[&str],
        _max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        let restricted = !include_domains.is_empty();
        self.calls.lock().unwrap().push(format!(
            "tavily{}:{}",
            if restricted { "-restricted" } else { "" },
            query
        ));
        if self.tavily_down {
            return Err(PortError::Transient("tavily outage".to_string()));
        }
        Ok(if restricted {
            self.tavily_restricted_hits.clone()
        } else {
            self.tavily_open_hits.clone()
        })
    }

    async fn duckduckgo(
        &self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchHit>, PortError> {
        self.calls.lock().unwrap().push(format!("ddg:{}", query));
        Ok(self.ddg_hits.clone())
    }
}

/// Scraper fake serving canned excerpts by URL
pub struct ScriptedScraper {
    pub pages: HashMap<String, String>,
}

impl ScriptedScraper {
    pub fn empty() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }

    pub fn with_pages(pages: Vec<(&str, &str)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl ScraperPort for ScriptedScraper {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, PortError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| PortError::Transient("host unreachable".to_string()))
    }
}

/// Config tuned for fast tests: retries collapse to a single attempt
pub fn test_config() -> AgentConfig {
    AgentConfig {
        vision_retries: 1,
        vision_backoff_s: 0.01,
        ..AgentConfig::default()
    }
}

/// Clock pinned so runs replay identically
pub fn fixed_clock() -> FixedClock {
    FixedClock(chrono::Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap())
}

/// Route agent tracing into test output when `RUST_LOG` asks for it
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assemble an agent over the scripted ports
pub fn build_agent(
    vision: ScriptedVision,
    llm: ScriptedLlm,
    discogs: ScriptedDiscogs,
    musicbrainz: ScriptedMusicBrainz,
    search: Arc<ScriptedSearch>,
    scraper: ScriptedScraper,
) -> Agent {
    init_tracing();
    Agent::new(
        test_config(),
        Arc::new(fixed_clock()),
        AgentPorts {
            vision: Arc::new(vision),
            llm: Arc::new(llm),
            discogs: Arc::new(discogs),
            musicbrainz: Arc::new(musicbrainz),
            search,
            scraper: Arc::new(scraper),
        },
    )
}
