//! Error types for Bastion.
//!
//! This module defines a unified error enum that covers configuration, I/O,
//! model and retrieval failures, plus the access-control taxonomy the query
//! pipeline reasons about (identity, retrieval, routing, budget, deadlines).

use thiserror::Error;

/// The only failure text a caller ever sees.
///
/// Internal failures are never distinguished for the end user, so that error
/// messages reveal nothing about whether content exists.
pub const USER_FACING_FAILURE: &str = "I'm unable to answer right now. Please try again later.";

/// Unified error type for Bastion.
///
/// All functions in the workspace return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generation provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Retrieval and answer assembly errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// The identity source could not be reached and no valid cached
    /// principal set exists.
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The external search index failed.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// No registered model satisfies the routing requirements.
    #[error("No eligible model: {0}")]
    NoEligibleModel(String),

    /// Every eligible model would exceed the period budget.
    #[error("Budget exceeded: {0}")]
    BudgetExceededHard(String),

    /// A pipeline stage ran past its deadline or was cancelled.
    #[error("Timed out during {stage}")]
    Timeout { stage: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Build a timeout error for the named stage.
    pub fn timeout(stage: impl Into<String>) -> Self {
        AppError::Timeout {
            stage: stage.into(),
        }
    }

    /// Whether an outer orchestration layer may retry the failed operation.
    ///
    /// Authorization, routing and budget failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RetrievalUnavailable(_) | AppError::Llm(_) | AppError::Timeout { .. }
        )
    }

    /// Stable machine-readable code, used in logs and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Llm(_) => "llm",
            AppError::Knowledge(_) => "knowledge",
            AppError::IdentityUnavailable(_) => "identity_unavailable",
            AppError::RetrievalUnavailable(_) => "retrieval_unavailable",
            AppError::NoEligibleModel(_) => "no_eligible_model",
            AppError::BudgetExceededHard(_) => "budget_exceeded",
            AppError::Timeout { .. } => "timeout",
            AppError::Serialization(_) => "serialization",
            AppError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
