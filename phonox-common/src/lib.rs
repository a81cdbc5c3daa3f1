//! # Phonox Common Library
//!
//! Shared code for the Phonox identification and valuation services:
//! - Error types
//! - Configuration loading (environment / TOML / compiled defaults)
//! - The Goldmine condition grading scale
//! - Clock abstraction for injectable time

pub mod condition;
pub mod config;
pub mod error;
pub mod time;

pub use condition::Condition;
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use time::{Clock, FixedClock, SystemClock};
