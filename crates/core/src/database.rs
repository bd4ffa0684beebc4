//! # Multi-Tenant Store
//!
//! `Store` wraps the SQLite connection pool and the per-tenant advisory
//! locks. Tenancy is row-based: every business table carries a `tenant_id`
//! column and every query in the repositories filters on it. The store is
//! passed explicitly to each operation; there are no module-level globals.
//!
//! ## Locking model
//!
//! Derived-metrics recomputes and recommendation runs both mutate client and
//! product aggregates for one tenant. To keep them from interleaving, each
//! takes the tenant's advisory lock (`tenant_lock`) for the duration of the
//! job. Read paths never take the lock and observe committed rows only.

use crate::error::{Error, Result};
use crate::types::TenantId;
use dashmap::DashMap;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Embedded schema, applied on connect. Idempotent.
const SCHEMA: &str = include_str!("schema.sql");

/// Shared handle to the relational store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    tenant_locks: Arc<DashMap<TenantId, Arc<Mutex<()>>>>,
}

impl Store {
    /// Connects to the given SQLite URL, creating the database file if
    /// needed, and bootstraps the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(Error::Storage)?
            .create_if_missing(true)
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            tenant_locks: Arc::new(DashMap::new()),
        };
        store.apply_schema().await?;
        debug!(url, "store connected");
        Ok(store)
    }

    /// Ephemeral in-memory store, used by the test suites. A single pooled
    /// connection keeps the in-memory database alive for the pool lifetime.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::Storage)?
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            tenant_locks: Arc::new(DashMap::new()),
        };
        store.apply_schema().await?;
        Ok(store)
    }

    /// Applies the embedded schema. Safe to call more than once.
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquires the advisory write lock for a tenant. Held by derived-metric
    /// recomputes and recommendation runs so they never interleave for the
    /// same tenant; dropped on guard drop.
    pub async fn tenant_lock(&self, tenant_id: TenantId) -> OwnedMutexGuard<()> {
        let lock = self
            .tenant_locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Runs a storage operation, retrying once with jittered backoff when it
/// fails with `Error::Storage`. Any other error is surfaced immediately.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(Error::Storage(cause)) => {
            let delay_ms = rand::thread_rng().gen_range(25..100);
            warn!(
                op = op_name,
                error = %cause,
                delay_ms,
                "transient storage error, retrying once"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            op().await
        }
        Err(other) => Err(other),
    }
}
