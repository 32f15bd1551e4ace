//! Error types for the chunk streaming engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Streaming service is no longer running")]
    ServiceClosed,
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
