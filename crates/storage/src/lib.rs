//! Watermark persistence for Watchtower.
//!
//! This crate provides the [`watchtower_core::ports::WatermarkStore`]
//! implementations: PostgreSQL for deployments, and an in-memory store for
//! tests and ephemeral runs.
//!
//! Both back the same compare-and-swap contract: a commit only lands when
//! the stored position still matches the one observed at tick start, so a
//! stale writer can never roll progress backwards.
//!
//! # Usage
//!
//! ```ignore
//! use watchtower_storage::{Database, DatabaseConfig, PgWatermarkStore};
//!
//! let config = DatabaseConfig::from_env();
//! let db = Database::connect(&config).await?;
//! db.ensure_schema().await?;
//!
//! let store = Arc::new(PgWatermarkStore::new(&db));
//! ```

pub mod memory;
pub mod postgres;

pub use memory::InMemoryWatermarkStore;
pub use postgres::{Database, DatabaseConfig, PgWatermarkStore};
