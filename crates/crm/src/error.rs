use thiserror::Error;

/// CRM domain errors.
#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Tenant not found: {id}")]
    TenantNotFound { id: i64 },

    #[error("Client not found: {code}")]
    ClientNotFound { code: String },

    #[error("Product not found: {key}")]
    ProductNotFound { key: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Duplicate client code: {code}")]
    DuplicateClientCode { code: String },

    #[error("Duplicate product key: {key}")]
    DuplicateProductKey { key: String },

    #[error("Duplicate alias label: {label}")]
    DuplicateAliasLabel { label: String },

    #[error("Duplicate run id: {run_id}")]
    DuplicateRunId { run_id: String },

    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Core system error: {0}")]
    Core(#[from] cuvee_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CrmError>;

impl CrmError {
    /// True when the underlying database error is a unique-constraint hit.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            CrmError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
