use std::time::Duration;
use thiserror::Error;

/// Recommendation/gating engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Run cancelled")]
    Cancelled,

    #[error("Run timed out after {0:?}")]
    Timeout(Duration),

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Export gate closed for run {run_id}: {reason}")]
    GateClosed { run_id: String, reason: String },

    #[error("Invalid batch size {size}: must be within [{min}, {max}]")]
    InvalidBatchSize {
        size: usize,
        min: usize,
        max: usize,
    },

    #[error("No eligible clients for run {run_id}")]
    NoEligibleClients { run_id: String },

    #[error("CRM error: {0}")]
    Crm(#[from] cuvee_crm::CrmError),

    #[error("Core system error: {0}")]
    Core(#[from] cuvee_core::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
