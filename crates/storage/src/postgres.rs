//! PostgreSQL watermark store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, instrument};

use watchtower_core::error::{StorageError, StorageResult};
use watchtower_core::models::Watermark;
use watchtower_core::ports::WatermarkStore;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection acquisition timeout.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/watchtower".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Create config from the `DATABASE_URL` environment variable.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/watchtower".to_string()),
            ..Default::default()
        }
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database with the given configuration.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        debug!(
            max_conn = config.max_connections,
            min_conn = config.min_connections,
            "Creating connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        debug!("Connection pool created");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the watermark table if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                job_id     TEXT PRIMARY KEY,
                position   BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        debug!("Watermark schema ready");
        Ok(())
    }

    /// Check if the database connection is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL implementation of [`WatermarkStore`].
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn get(&self, job_id: &str) -> StorageResult<Option<Watermark>> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            SELECT job_id, position, updated_at
            FROM watermarks
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(row.map(WatermarkRow::into_watermark))
    }

    async fn compare_and_set(
        &self,
        expected: Option<u64>,
        new: &Watermark,
    ) -> StorageResult<()> {
        let result = match expected {
            // First commit for this job: only insert if no row exists.
            None => sqlx::query(
                r#"
                INSERT INTO watermarks (job_id, position, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (job_id) DO NOTHING
                "#,
            )
            .bind(&new.job_id)
            .bind(new.position as i64)
            .bind(new.updated_at)
            .execute(&self.pool)
            .await,
            // Advance only from the position observed at tick start.
            Some(position) => sqlx::query(
                r#"
                UPDATE watermarks
                SET position = $2, updated_at = $3
                WHERE job_id = $1 AND position = $4
                "#,
            )
            .bind(&new.job_id)
            .bind(new.position as i64)
            .bind(new.updated_at)
            .bind(position as i64)
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| StorageError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict {
                job_id: new.job_id.clone(),
                expected,
            });
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WatermarkRow {
    job_id: String,
    position: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl WatermarkRow {
    fn into_watermark(self) -> Watermark {
        Watermark {
            job_id: self.job_id,
            position: self.position as u64,
            updated_at: self.updated_at,
        }
    }
}
