//! Port trait for chain source adapters.
//!
//! This trait defines the interface for querying a blockchain for its
//! current height and for ranges of activity. Implementations live in the
//! infrastructure layer (`watchtower-chains`), one per chain family.

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::{ChainId, FinalityTag, JobFilters, RawChainRecord};

/// Port trait for chain source adapters.
///
/// Adapters are stateless with respect to the watermark: the poller owns
/// all progress tracking. Their only side effects are outbound RPC calls.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Chain this source reads from.
    fn chain_id(&self) -> ChainId;

    /// Current chain height at the requested finality level.
    ///
    /// On chains without a native finalized tag this may poll a per-block
    /// finality predicate with growing delays; exhaustion of that budget is
    /// a [`crate::error::ChainError::FinalityUnresolved`], never a silently
    /// stale height.
    async fn current_height(&self, finality: FinalityTag) -> ChainResult<u64>;

    /// Fetch all records of interest in the inclusive range `[from, to]`.
    ///
    /// Filters are applied upstream where the RPC supports it. When the
    /// address set exceeds the filter divide-batch size, the adapter splits
    /// it into fixed-size batches, merges the results, and deduplicates by
    /// record fingerprint so batch boundaries never yield duplicates.
    ///
    /// Records from the same block preserve their original relative order.
    async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>>;
}
