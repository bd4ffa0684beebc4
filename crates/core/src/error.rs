use thiserror::Error;

/// Error taxonomy shared by every core boundary.
///
/// Ingestion and loader failures are usually collected into structured
/// reports instead of being raised; the variants here are what crosses an
/// operation boundary when collection is not possible (storage, identity,
/// cancellation) or when a caller asks for a single table/entity.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Contract violation in {table}: missing columns {missing_columns:?}")]
    Contract {
        table: String,
        missing_columns: Vec<String>,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Unresolved product label: {label}")]
    Resolution { label: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Missing tenant identity")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: duplicate natural key: {0}")]
    Conflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable tag used in loader outcomes and pipeline
    /// reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Contract { .. } => "ContractError",
            Error::Integrity(_) => "IntegrityError",
            Error::Resolution { .. } => "ResolutionError",
            Error::Storage(_) => "StorageError",
            Error::Unauthenticated => "Unauthenticated",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::Cancelled => "Cancelled",
            Error::Timeout(_) => "Timeout",
            Error::Validation { .. } => "ValidationError",
            Error::Serialization(_) => "SerializationError",
            Error::Io(_) => "IoError",
            Error::Config(_) => "ConfigError",
            Error::Internal { .. } => "InternalError",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}
