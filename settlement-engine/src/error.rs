//! Error types for the settlement engine
//!
//! One taxonomy covers escrow, payout, dispute and gateway operations so the
//! HTTP layer can map every failure to a status code without inspecting
//! message strings.

use thiserror::Error;

/// Main error type for settlement operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or out-of-range input (e.g. payout exceeding balance)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid state transition or duplicate non-terminal resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lost a single-flight race; expected and retry-safe
    #[error("Operation already in progress: {0}")]
    Concurrency(String),

    /// Payment processor unavailable or timed out after retries
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Webhook authenticity failure; only the order id leaves the engine
    #[error("Notification signature mismatch for order {0}")]
    Signature(String),

    /// Missing resource
    #[error("{0} {1} not found")]
    NotFound(&'static str, String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a concurrency error
    pub fn concurrency<S: Into<String>>(msg: S) -> Self {
        Self::Concurrency(msg.into())
    }

    /// Create a gateway error
    pub fn gateway<S: Into<String>>(msg: S) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create a signature error
    pub fn signature<S: Into<String>>(order_id: S) -> Self {
        Self::Signature(order_id.into())
    }

    /// Create a not-found error
    pub fn not_found<S: ToString>(entity: &'static str, id: S) -> Self {
        Self::NotFound(entity, id.to_string())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
