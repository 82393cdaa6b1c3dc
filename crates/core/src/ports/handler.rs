//! Port traits for the transform/deliver half of the pipeline.
//!
//! A [`Mapper`] is a pure function from one raw record to zero-or-more
//! canonical events. A [`Target`] is a downstream delivery endpoint. A
//! [`Handler`] glues one mapper to one target, with dedup and batching in
//! between; jobs run an ordered chain of handlers per fetched range.

use async_trait::async_trait;

use crate::error::{DeliveryResult, MappingResult, WatcherResult};
use crate::models::{NormalizedEvent, RawChainRecord};

// =============================================================================
// Mapper
// =============================================================================

/// Pure, synchronous transform from a raw chain record to canonical events.
///
/// Returning an empty vec means the record is not of interest - a normal
/// outcome, not a failure. An `Err` means the record matched a
/// discriminator but required data was missing or malformed; the caller
/// logs it, counts it, and continues with the rest of the batch.
///
/// Mappers never perform I/O.
pub trait Mapper: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Map one record to zero or more normalized events.
    fn map(&self, record: &RawChainRecord) -> MappingResult<Vec<NormalizedEvent>>;
}

// =============================================================================
// Target
// =============================================================================

/// Downstream delivery endpoint for normalized events.
///
/// At least two implementations exist: an HTTP pub/sub publisher and a
/// no-op logging sink (dry-run). The handler contract is identical in both
/// modes; which target a job gets is decided once at construction time.
#[async_trait]
pub trait Target: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Deliver a batch of events. All-or-nothing per call: a failure means
    /// no event in the batch may be reported as delivered.
    async fn deliver(&self, events: &[NormalizedEvent]) -> DeliveryResult<()>;
}

// =============================================================================
// Handler
// =============================================================================

/// Per-batch delivery statistics, recorded best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Records inspected.
    pub records: usize,
    /// Events produced by the mapper after dedup.
    pub events: usize,
    /// Records the mapper rejected as malformed.
    pub mapping_errors: usize,
}

/// One stage of a job's handler chain.
///
/// Receives every raw record fetched for a range, maps, deduplicates,
/// batches, and delivers. Any delivery failure must surface as an error so
/// the poller withholds the watermark commit for the whole range.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Process one fetched range worth of records.
    async fn handle(&self, records: &[RawChainRecord]) -> WatcherResult<HandlerStats>;
}
