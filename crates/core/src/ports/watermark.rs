//! Port trait for the watermark store.
//!
//! The store is the only resource shared and mutated across ticks of the
//! same job. Durability belongs to the implementation (PostgreSQL, memory);
//! the core only requires the compare-and-swap contract.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::Watermark;

/// Port trait for durable per-job progress tracking.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the current watermark for a job, if any.
    async fn get(&self, job_id: &str) -> StorageResult<Option<Watermark>>;

    /// Write a new watermark if and only if the stored position still
    /// matches `expected` (`None` = no watermark exists yet).
    ///
    /// A mismatch returns [`crate::error::StorageError::Conflict`]: a stale
    /// writer resuming after a crash must not overwrite newer progress.
    async fn compare_and_set(
        &self,
        expected: Option<u64>,
        new: &Watermark,
    ) -> StorageResult<()>;
}
