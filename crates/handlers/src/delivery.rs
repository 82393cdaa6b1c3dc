//! The delivery stage: map, dedup, batch, deliver.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use watchtower_core::error::{DeliveryError, WatcherResult};
use watchtower_core::metrics::{
    record_events_delivered, record_events_failed, record_events_processed, record_mapping_error,
};
use watchtower_core::models::{NormalizedEvent, RawChainRecord};
use watchtower_core::ports::{Handler, HandlerStats, Mapper, Target};

/// One mapper/target stage of a job's handler chain.
///
/// Malformed records are logged and counted but never abort the batch;
/// losing one bad record is acceptable, losing the whole range is not.
/// A failed delivery is the opposite: it surfaces as an error so the
/// poller withholds the watermark commit and re-fetches the range.
pub struct EventHandler {
    mapper: Box<dyn Mapper>,
    target: Box<dyn Target>,
    batch_size: usize,
}

impl EventHandler {
    pub fn new(mapper: Box<dyn Mapper>, target: Box<dyn Target>, batch_size: usize) -> Self {
        Self {
            mapper,
            target,
            batch_size: batch_size.max(1),
        }
    }

    fn map_all(&self, records: &[RawChainRecord]) -> (Vec<NormalizedEvent>, usize) {
        let mut events = Vec::new();
        let mut mapping_errors = 0;
        for record in records {
            match self.mapper.map(record) {
                Ok(mapped) => events.extend(mapped),
                Err(err) => {
                    warn!(
                        mapper = self.mapper.name(),
                        tx_hash = %record.tx_hash,
                        error = %err,
                        "⚠️ Record rejected by mapper"
                    );
                    record_mapping_error(record.chain_id, self.mapper.name());
                    mapping_errors += 1;
                }
            }
        }
        (events, mapping_errors)
    }
}

#[async_trait]
impl Handler for EventHandler {
    fn name(&self) -> &'static str {
        self.mapper.name()
    }

    async fn handle(&self, records: &[RawChainRecord]) -> WatcherResult<HandlerStats> {
        let (events, mapping_errors) = self.map_all(records);

        // Overlapping filter batches can surface the same occurrence twice;
        // drop exact duplicates before they reach the target.
        let mut seen = HashSet::new();
        let events: Vec<NormalizedEvent> = events
            .into_iter()
            .filter(|event| seen.insert(event.fingerprint()))
            .collect();

        let stats = HandlerStats {
            records: records.len(),
            events: events.len(),
            mapping_errors,
        };

        let Some(chain_id) = records.first().map(|r| r.chain_id) else {
            return Ok(stats);
        };
        // Processed counts are keyed by event name, not by mapper: one
        // mapper can produce several event kinds.
        let mut by_name: HashMap<&str, u64> = HashMap::new();
        for event in &events {
            *by_name.entry(event.name.as_str()).or_default() += 1;
        }
        for (name, count) in by_name {
            record_events_processed(chain_id, name, count);
        }

        if events.is_empty() {
            return Ok(stats);
        }

        let chunks: Vec<&[NormalizedEvent]> = events.chunks(self.batch_size).collect();
        let total = chunks.len();
        let mut failed = 0;
        for chunk in chunks {
            if let Err(err) = self.target.deliver(chunk).await {
                warn!(
                    target = self.target.name(),
                    size = chunk.len(),
                    error = %err,
                    "❌ Delivery batch failed"
                );
                failed += 1;
            }
        }

        if failed > 0 {
            // No event in the range counts as delivered, even from chunks
            // that succeeded; the whole range is retried next tick.
            record_events_failed(chain_id, self.target.name(), events.len() as u64);
            return Err(DeliveryError::BatchFailed { failed, total }.into());
        }

        record_events_delivered(chain_id, self.target.name(), events.len() as u64);
        debug!(
            mapper = self.mapper.name(),
            target = self.target.name(),
            events = stats.events,
            "Range delivered"
        );
        Ok(stats)
    }
}
