//! Error taxonomy for the identification agent
//!
//! Errors split along two axes: whether they end the run (validation,
//! empty vision, deadline) and whether a provider call may be retried
//! (transient) or must fail soft (fatal).

use thiserror::Error;

/// Run-level errors surfaced by pipeline stages
#[derive(Debug, Error)]
pub enum AgentError {
    /// Image preconditions violated; fatal for the run
    #[error("Validation error: {0}")]
    Validation(String),

    /// Timeout, 429, 5xx, transient network; retried with backoff
    #[error("Transient provider error: {0}")]
    ProviderTransient(String),

    /// Malformed 4xx, authentication failure; no retry, stage fails soft
    #[error("Provider error: {0}")]
    ProviderFatal(String),

    /// LLM returned non-JSON after the final attempt
    #[error("Parse error: {0}")]
    Parse(String),

    /// Aggregated metadata has no non-null fields and confidence 0
    #[error("Vision produced no usable metadata")]
    EmptyVision,

    /// Run deadline reached; evidence collected so far is preserved
    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    /// Invariant breakage inside the agent itself
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable error label carried on failed run results
    pub fn label(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::ProviderTransient(_) => "provider_transient",
            AgentError::ProviderFatal(_) => "provider_fatal",
            AgentError::Parse(_) => "parse_error",
            AgentError::EmptyVision => "empty_vision",
            AgentError::DeadlineExceeded => "deadline_exceeded",
            AgentError::Internal(_) => "internal_error",
        }
    }
}

/// Errors produced by the external-port implementations
#[derive(Debug, Error)]
pub enum PortError {
    /// Timeout, 429, 5xx, connection reset; candidate for retry
    #[error("Transient: {0}")]
    Transient(String),

    /// Auth failure or malformed 4xx; retrying cannot help
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Response body did not match the expected shape
    #[error("Parse: {0}")]
    Parse(String),

    /// Rate-limit token not granted within the bounded wait
    #[error("Rate limit exhausted")]
    RateLimited,
}

impl PortError {
    /// Whether the retry loop should attempt the call again.
    ///
    /// Parse errors are retryable until the attempt budget runs out (LLM
    /// output is nondeterministic); rate-limit exhaustion already waited its
    /// bounded budget and fails soft instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Transient(_) | PortError::Parse(_))
    }
}

impl From<PortError> for AgentError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Transient(msg) => AgentError::ProviderTransient(msg),
            PortError::Fatal(msg) => AgentError::ProviderFatal(msg),
            PortError::Parse(msg) => AgentError::Parse(msg),
            PortError::RateLimited => {
                AgentError::ProviderTransient("rate limit exhausted".to_string())
            }
        }
    }
}
