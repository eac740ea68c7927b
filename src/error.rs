//! Error types for Biomarker Flux
//!
//! Missing data and malformed readings never surface here: they fall back to
//! defaults or are dropped during normalization. What remains are failures the
//! caller has to see, mostly collaborator outages and bad configuration.

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidConfig(String),

    #[error("Unknown biomarker: {0}")]
    UnknownBiomarker(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl ComputeError {
    /// Wrap a collaborator failure so it propagates unmasked.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        ComputeError::Upstream(err.to_string())
    }
}
