//! Database layer for Herald.
//!
//! PostgreSQL via sqlx. The pool is shared by [`PgQueueBackend`] and
//! [`PgPostStore`]; migrations live in `migrations/` next to this crate.

mod jobs;
mod posts;

pub use jobs::PgQueueBackend;
pub use posts::PgPostStore;

use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, HeraldError, Result};

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    max_connections: u32,
}

/// Pool occupancy, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max_connections: u32,
    pub latency_ms: u64,
}

impl Database {
    /// Open the pool described by `config`.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                HeraldError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Unable to connect to the database",
                    e.to_string(),
                )
                .with_source(e)
            })?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );

        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            max_connections: 0,
        }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let started = Instant::now();
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Database migrations applied"
        );
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(started.elapsed())
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let latency = self.ping().await?;
        Ok(PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
            max_connections: self.max_connections,
            latency_ms: latency.as_millis() as u64,
        })
    }

    pub fn queue_backend(&self) -> PgQueueBackend {
        PgQueueBackend::new(self.pool.clone())
    }

    pub fn post_store(&self) -> PgPostStore {
        PgPostStore::new(self.pool.clone())
    }
}
