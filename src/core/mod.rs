//! Core types and utilities shared by the streaming engine

pub mod config;
pub mod error;
pub mod logging;

pub use config::StreamingConfig;
pub use error::{Error, Result};
