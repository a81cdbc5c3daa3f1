//! Common error types for Phonox

use thiserror::Error;

/// Common result type for Phonox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Phonox services
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
