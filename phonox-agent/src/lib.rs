//! # Phonox Identification & Valuation Agent
//!
//! Identifies vinyl records from user-supplied photographs and computes a
//! market valuation by fusing evidence from a multimodal vision model, the
//! Discogs and MusicBrainz databases, and web search, under a weighted
//! confidence model with an auditable evidence chain.
//!
//! The agent is a library: the HTTP surface, persistence, and UI are host
//! concerns. Hosts construct an [`Agent`] from an [`AgentConfig`] and a set
//! of [`AgentPorts`] (concrete implementations live in [`clients`]) and
//! drive runs through [`Agent::identify`] and [`Agent::reanalyze`].

pub mod clients;
pub mod error;
pub mod limiter;
pub mod ports;
pub mod retry;
pub mod services;
pub mod types;

pub use error::{AgentError, PortError};
pub use services::orchestrator::{Agent, AgentPorts, IdentifyOptions};
pub use types::{
    AggregatedMetadata, ChangeAction, ChangeLogEntry, Evidence, EvidenceSource, GateDecision,
    ImageInput, ImageProposal, MetadataProposal, RunResult, RunState, RunStatus, StoredRecord,
    Valuation,
};
