//! Error types for the financial search orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Planning failure: {0}")]
    Planning(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Capability '{capability}' failed: {message}")]
    Capability {
        capability: String,
        message: String,
    },

    #[error("All capability calls failed")]
    AllCapabilitiesFailed,

    #[error("Synthesis failure: {0}")]
    Synthesis(String),

    #[error("Cache unavailable: {0}")]
    Cache(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Invalid capability input: {0}")]
    InvalidCapabilityInput(String),

    #[error("Request canceled")]
    Canceled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SearchError {
    /// Whether this error should surface to the user as a terminal `error`
    /// event, as opposed to being recovered or swallowed locally.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SearchError::Cache(_) | SearchError::Canceled)
    }
}
