//! OpenAI-compatible vision and completion client
//!
//! One client backs both LLM ports: per-image vision extraction (images as
//! base64 data URLs) and plain text completion for aggregation, valuation
//! and enhancement. The base URL is overridable so any chat-completions
//! compatible provider can stand in.

use crate::clients::{classify_status, map_request_error, USER_AGENT};
use crate::error::PortError;
use crate::ports::{LlmClient, PromptVariant, VisionClient};
use crate::types::{ImageInput, MetadataProposal};
use async_trait::async_trait;
use base64::Engine;
use phonox_common::AgentConfig;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const FRONT_COVER_PROMPT: &str = "\
You are analyzing the FRONT COVER of a vinyl record. Prioritize reading the \
artist name and album title; note year, label, catalog number and visible \
condition cues if present. Any 12-13 digit number sequence is a barcode and \
belongs in the \"barcode\" field, never in \"catalog_number\". Respond with \
strict JSON only, exactly these keys: {\"artist\": string|null, \"title\": \
string|null, \"year\": number|null, \"label\": string|null, \
\"catalog_number\": string|null, \"barcode\": string|null, \"genres\": \
[string], \"confidence\": number, \"condition\": \
\"M\"|\"NM\"|\"VG+\"|\"VG\"|\"G+\"|\"G\"|\"F\"|\"P\"|null, \
\"condition_notes\": string|null}";

const DETAIL_SHOT_PROMPT: &str = "\
You are analyzing a BACK COVER, SPINE or LABEL photograph of a vinyl record. \
Prioritize reading the barcode, catalog number, label name and physical \
condition cues (seam splits, ring wear, scratches). Any 12-13 digit number \
sequence is a barcode and belongs in the \"barcode\" field, never in \
\"catalog_number\". Do not repeat guesses already established by earlier \
images unless this photograph confirms them. Respond with strict JSON only, \
exactly these keys: {\"artist\": string|null, \"title\": string|null, \
\"year\": number|null, \"label\": string|null, \"catalog_number\": \
string|null, \"barcode\": string|null, \"genres\": [string], \"confidence\": \
number, \"condition\": \"M\"|\"NM\"|\"VG+\"|\"VG\"|\"G+\"|\"G\"|\"F\"|\"P\"|null, \
\"condition_notes\": string|null}";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions client implementing both LLM ports
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &AgentConfig) -> Result<Self, PortError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| PortError::Fatal("Vision provider API key not configured".to_string()))?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PortError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            api_key,
            base_url: config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn chat(
        &self,
        model: &str,
        messages: serde_json::Value,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String, PortError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, "LLM"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "LLM"));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(format!("LLM response envelope: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PortError::Parse("LLM response had no content".to_string()))
    }
}

/// Trim whatever the model wrapped around the JSON body
fn json_body(response: &str) -> &str {
    let trimmed = response.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[async_trait]
impl VisionClient for OpenAiClient {
    async fn extract(
        &self,
        image: &ImageInput,
        variant: PromptVariant,
        prior: &[MetadataProposal],
        model: &str,
    ) -> Result<MetadataProposal, PortError> {
        let system_prompt = match variant {
            PromptVariant::FrontCover => FRONT_COVER_PROMPT,
            PromptVariant::DetailShot => DETAIL_SHOT_PROMPT,
        };

        let mut user_text = String::from("Analyze this photograph.");
        if !prior.is_empty() {
            let prior_json = serde_json::to_string(prior)
                .map_err(|e| PortError::Parse(format!("prior proposals: {}", e)))?;
            user_text = format!(
                "Analyze this photograph. Proposals from earlier images of the same record:\n{}",
                prior_json
            );
        }

        let data_url = format!(
            "data:{};base64,{}",
            image.content_type,
            base64::engine::general_purpose::STANDARD.encode(&image.bytes)
        );
        let messages = serde_json::json!([
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": [
                {"type": "text", "text": user_text},
                {"type": "image_url", "image_url": {"url": data_url}}
            ]}
        ]);

        let content = self.chat(model, messages, 700, true).await?;
        serde_json::from_str(json_body(&content))
            .map_err(|e| PortError::Parse(format!("vision proposal: {}", e)))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, PortError> {
        let messages = serde_json::json!([
            {"role": "user", "content": prompt}
        ]);
        self.chat(model, messages, max_tokens, false).await
    }
}
