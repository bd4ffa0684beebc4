pub mod config;
pub mod database;
pub mod error;
pub mod text;
pub mod types;

pub use config::{AppConfig, DataConfig, DatabaseConfig, DispatchConfig, EngineConfig};
pub use database::{with_retry, Store};
pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
