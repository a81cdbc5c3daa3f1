//! Configuration loading for the identification agent
//!
//! Resolution priority for every knob:
//! 1. Environment variable (`PHONOX_*`, highest priority)
//! 2. TOML config file (`PHONOX_CONFIG` path, else platform config dir)
//! 3. Compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the identification and valuation agent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Validator upper bound on image count per run
    pub max_images: usize,
    /// Per-image byte ceiling
    pub max_image_bytes: usize,
    /// Total byte ceiling across all images in a run
    pub max_total_bytes: usize,
    /// Concurrent vision calls during per-image fan-out
    pub vision_concurrency: usize,
    /// Vision call attempts (including the first)
    pub vision_retries: u32,
    /// Base backoff between vision retries, seconds
    pub vision_backoff_s: f64,
    /// Per-call timeout for metadata providers, seconds
    pub metadata_timeout_s: u64,
    /// Combined budget for the metadata lookup stage, seconds
    pub metadata_budget_s: u64,
    /// Confidence below which web search runs
    pub confidence_fallback_trigger: f64,
    /// Per-URL scrape timeout, seconds
    pub web_scraping_timeout_s: u64,
    /// Maximum number of result pages scraped
    pub web_scraping_max_urls: usize,
    /// Cap on aggregated genre list length
    pub max_genres: usize,
    /// Bounded wait for a rate-limit token before failing soft, seconds
    pub rate_limit_wait_s: u64,
    /// Run deadline for identify, seconds
    pub identify_deadline_s: u64,
    /// Run deadline for reanalyze, seconds
    pub reanalyze_deadline_s: u64,
    /// Model identifier for per-image vision extraction
    pub vision_model: String,
    /// Model identifier for multi-image aggregation
    pub aggregation_model: String,
    /// Model identifier for market valuation
    pub valuation_model: String,
    /// Model identifier for record enhancement
    pub enhancement_model: String,
    /// Discogs personal access token
    pub discogs_token: Option<String>,
    /// Tavily API key; web search falls back to DuckDuckGo when absent
    pub tavily_api_key: Option<String>,
    /// API key for the vision/LLM provider
    pub openai_api_key: Option<String>,
    /// Override base URL for an OpenAI-compatible provider
    pub openai_base_url: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_images: 10,
            max_image_bytes: 10 * 1024 * 1024,
            max_total_bytes: 100 * 1024 * 1024,
            vision_concurrency: 3,
            vision_retries: 3,
            vision_backoff_s: 1.0,
            metadata_timeout_s: 5,
            metadata_budget_s: 8,
            confidence_fallback_trigger: 0.75,
            web_scraping_timeout_s: 8,
            web_scraping_max_urls: 3,
            max_genres: 8,
            rate_limit_wait_s: 2,
            identify_deadline_s: 60,
            reanalyze_deadline_s: 90,
            vision_model: "gpt-4o".to_string(),
            aggregation_model: "gpt-4o-mini".to_string(),
            valuation_model: "gpt-4o".to_string(),
            enhancement_model: "gpt-4o-mini".to_string(),
            discogs_token: None,
            tavily_api_key: None,
            openai_api_key: None,
            openai_base_url: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration with full resolution priority
    pub fn load() -> Result<Self> {
        let mut config = match resolve_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PHONOX_*` environment overrides on top of file/defaults
    fn apply_env_overrides(&mut self) {
        env_parse("PHONOX_MAX_IMAGES", &mut self.max_images);
        env_parse("PHONOX_MAX_IMAGE_BYTES", &mut self.max_image_bytes);
        env_parse("PHONOX_MAX_TOTAL_BYTES", &mut self.max_total_bytes);
        env_parse("PHONOX_VISION_CONCURRENCY", &mut self.vision_concurrency);
        env_parse("PHONOX_VISION_RETRIES", &mut self.vision_retries);
        env_parse("PHONOX_VISION_BACKOFF_S", &mut self.vision_backoff_s);
        env_parse("PHONOX_METADATA_TIMEOUT_S", &mut self.metadata_timeout_s);
        env_parse("PHONOX_METADATA_BUDGET_S", &mut self.metadata_budget_s);
        env_parse(
            "PHONOX_CONFIDENCE_FALLBACK_TRIGGER",
            &mut self.confidence_fallback_trigger,
        );
        env_parse("PHONOX_WEB_SCRAPING_TIMEOUT", &mut self.web_scraping_timeout_s);
        env_parse("PHONOX_WEB_SCRAPING_MAX_URLS", &mut self.web_scraping_max_urls);
        env_parse("PHONOX_MAX_GENRES", &mut self.max_genres);
        env_parse("PHONOX_RATE_LIMIT_WAIT_S", &mut self.rate_limit_wait_s);
        env_parse("PHONOX_IDENTIFY_DEADLINE_S", &mut self.identify_deadline_s);
        env_parse("PHONOX_REANALYZE_DEADLINE_S", &mut self.reanalyze_deadline_s);
        env_string("PHONOX_VISION_MODEL", &mut self.vision_model);
        env_string("PHONOX_AGGREGATION_MODEL", &mut self.aggregation_model);
        env_string("PHONOX_VALUATION_MODEL", &mut self.valuation_model);
        env_string("PHONOX_ENHANCEMENT_MODEL", &mut self.enhancement_model);
        env_opt_string("PHONOX_DISCOGS_TOKEN", &mut self.discogs_token);
        env_opt_string("PHONOX_TAVILY_API_KEY", &mut self.tavily_api_key);
        env_opt_string("PHONOX_OPENAI_API_KEY", &mut self.openai_api_key);
        env_opt_string("PHONOX_OPENAI_BASE_URL", &mut self.openai_base_url);
    }

    /// Reject configurations that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.max_images == 0 {
            return Err(Error::Config("max_images must be at least 1".to_string()));
        }
        if self.max_image_bytes == 0 || self.max_total_bytes < self.max_image_bytes {
            return Err(Error::Config(
                "image byte limits must be positive and total >= per-image".to_string(),
            ));
        }
        if self.vision_concurrency == 0 {
            return Err(Error::Config(
                "vision_concurrency must be at least 1".to_string(),
            ));
        }
        if self.identify_deadline_s == 0 || self.reanalyze_deadline_s == 0 {
            return Err(Error::Config("run deadlines must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_fallback_trigger) {
            return Err(Error::Config(
                "confidence_fallback_trigger must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_s)
    }

    pub fn metadata_budget(&self) -> Duration {
        Duration::from_secs(self.metadata_budget_s)
    }

    pub fn web_scraping_timeout(&self) -> Duration {
        Duration::from_secs(self.web_scraping_timeout_s)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_s)
    }

    pub fn vision_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.vision_backoff_s)
    }

    pub fn identify_deadline(&self) -> Duration {
        Duration::from_secs(self.identify_deadline_s)
    }

    pub fn reanalyze_deadline(&self) -> Duration {
        Duration::from_secs(self.reanalyze_deadline_s)
    }
}

/// Locate the config file: `PHONOX_CONFIG` path first, then the platform
/// config directory
fn resolve_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PHONOX_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "PHONOX_CONFIG points at a missing file");
        return None;
    }

    let candidate = dirs::config_dir().map(|d| d.join("phonox").join("config.toml"))?;
    candidate.exists().then_some(candidate)
}

fn env_parse<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "Ignoring unparseable env override"),
        }
    }
}

fn env_string(name: &str, slot: &mut String) {
    if let Ok(raw) = std::env::var(name) {
        if !raw.is_empty() {
            *slot = raw;
        }
    }
}

fn env_opt_string(name: &str, slot: &mut Option<String>) {
    if let Ok(raw) = std::env::var(name) {
        if !raw.is_empty() {
            *slot = Some(raw);
        }
    }
}
