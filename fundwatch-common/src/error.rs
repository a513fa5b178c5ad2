//! Error types shared by fundwatch services.

use thiserror::Error;

/// Result type alias using the fundwatch error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for fundwatch services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
