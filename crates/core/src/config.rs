//! # Configuration Management
//!
//! Layered configuration for the platform, loaded in order of precedence:
//!
//! 1. **Environment variables** prefixed `CUVEE_` (highest precedence)
//! 2. **Environment-specific TOML** (e.g. `config/production.toml`)
//! 3. **Default TOML** (`config/default.toml`)
//! 4. Built-in defaults (lowest precedence)
//!
//! The environment is selected by the `ENVIRONMENT` variable
//! (`development` by default). Every field has a built-in default so the
//! pipeline binary and the test suites run without any config file present.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Main configuration structure for all core services.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Store connection settings
    pub database: DatabaseConfig,
    /// Data-directory roots for the file pipeline
    pub data: DataConfig,
    /// Analytics and recommendation-engine tuning
    pub engine: EngineConfig,
    /// Marketing dispatch guardrails
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL. `sqlite::memory:` is accepted for ephemeral
    /// runs; file URLs are created on first connect.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/cuvee.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// Root under which per-tenant run directories are created:
    /// `{root}/{tenant_id}/runs/{run_id}/{raw,staging,curated}`.
    pub root: PathBuf,
    /// Destination for exported run artifacts.
    pub export_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            export_dir: PathBuf::from("exports"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Default number of recommendations kept per client.
    pub top_n: usize,
    /// Minimum days between two marketing contacts for the same client.
    pub silence_window_days: i64,
    /// Seed for the k-means clustering service. Required for deterministic
    /// runs; recorded in the run's `config_hash`.
    pub kmeans_seed: u64,
    pub kmeans_clusters: usize,
    /// Budget-band thresholds over the tenant AOV distribution.
    pub budget_low_quantile: f64,
    pub budget_high_quantile: f64,
    /// Per-run wall-clock budget; expiry cancels the run cooperatively.
    pub run_timeout_seconds: u64,
    /// Worker-pool width for per-client scoring inside a run.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            silence_window_days: 7,
            kmeans_seed: 42,
            kmeans_clusters: 4,
            budget_low_quantile: 0.33,
            budget_high_quantile: 0.66,
            run_timeout_seconds: 600,
            workers: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dry-run is the default posture: no external call, contact events
    /// recorded with status `dry_run`.
    pub dry_run: bool,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            min_batch_size: 200,
            max_batch_size: 300,
        }
    }
}

impl AppConfig {
    /// Loads configuration from TOML files and the environment.
    ///
    /// Environment variables use `__` as the section separator, e.g.
    /// `CUVEE_DATABASE__URL` maps to `database.url` and
    /// `CUVEE_ENGINE__TOP_N` to `engine.top_n`.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(Environment::with_prefix("CUVEE").separator("__"));

        let loaded: AppConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.top_n == 0 {
            return Err(ConfigError::Message(
                "engine.top_n must be at least 1".to_string(),
            ));
        }
        if !(1..=60).contains(&self.engine.silence_window_days) {
            return Err(ConfigError::Message(
                "engine.silence_window_days must be between 1 and 60".to_string(),
            ));
        }
        if self.engine.budget_low_quantile <= 0.0
            || self.engine.budget_high_quantile >= 1.0
            || self.engine.budget_low_quantile >= self.engine.budget_high_quantile
        {
            return Err(ConfigError::Message(
                "budget quantiles must satisfy 0 < low < high < 1".to_string(),
            ));
        }
        if self.dispatch.min_batch_size > self.dispatch.max_batch_size {
            return Err(ConfigError::Message(
                "dispatch.min_batch_size must not exceed dispatch.max_batch_size".to_string(),
            ));
        }
        if self.engine.workers == 0 {
            return Err(ConfigError::Message(
                "engine.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.top_n, 5);
        assert_eq!(config.engine.silence_window_days, 7);
        assert!(config.dispatch.dry_run);
    }

    #[test]
    fn quantile_ordering_is_enforced() {
        let mut config = AppConfig::default();
        config.engine.budget_low_quantile = 0.8;
        config.engine.budget_high_quantile = 0.4;
        assert!(config.validate().is_err());
    }
}
