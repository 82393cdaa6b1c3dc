//! Sui chain source adapter.
//!
//! Positions are checkpoint sequence numbers. Sui only exposes certified
//! checkpoints over RPC, so every finality tag resolves to the latest
//! checkpoint; there is no weaker head to observe.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::trace;

use watchtower_core::error::{ChainError, ChainResult};
use watchtower_core::models::{ChainId, FinalityTag, JobFilters, RawChainRecord};
use watchtower_core::ports::ChainSource;

use crate::rpc::{RpcClient, RpcClientConfig};

// multiGetTransactionBlocks caps its input size server-side.
const DIGEST_BATCH: usize = 50;

/// Sui JSON-RPC source adapter.
pub struct SuiSource {
    rpc: RpcClient,
    chain_id: ChainId,
}

impl SuiSource {
    pub fn new(config: RpcClientConfig, chain_id: ChainId) -> Self {
        Self {
            rpc: RpcClient::new(config),
            chain_id,
        }
    }

    async fn fetch_checkpoint(
        &self,
        sequence: u64,
        addresses: &HashSet<String>,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let checkpoint: Value = self
            .rpc
            .call("sui_getCheckpoint", json!([sequence.to_string()]))
            .await
            .map_err(ChainError::from)?;

        let block_time = checkpoint
            .get("timestampMs")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let digests: Vec<String> = checkpoint
            .get("transactions")
            .and_then(|t| t.as_array())
            .map(|digests| {
                digests
                    .iter()
                    .filter_map(|d| d.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut records = Vec::new();
        let mut index: u32 = 0;
        for chunk in digests.chunks(DIGEST_BATCH) {
            let blocks: Vec<Value> = self
                .rpc
                .call(
                    "sui_multiGetTransactionBlocks",
                    json!([chunk, { "showEvents": true, "showInput": true }]),
                )
                .await
                .map_err(ChainError::from)?;

            for block in blocks {
                let digest = block
                    .get("digest")
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| {
                        ChainError::InvalidResponse(format!(
                            "transaction block without digest in checkpoint {sequence}"
                        ))
                    })?
                    .to_string();

                if block_matches(&block, addresses) {
                    records.push(RawChainRecord {
                        chain_id: self.chain_id,
                        tx_hash: digest,
                        block_height: sequence,
                        block_time,
                        index_in_block: index,
                        payload: block,
                    });
                }
                index += 1;
            }
        }
        trace!(sequence, count = records.len(), "Checkpoint fetched");
        Ok(records)
    }
}

#[async_trait]
impl ChainSource for SuiSource {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn current_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
        let sequence: String = self
            .rpc
            .call("sui_getLatestCheckpointSequenceNumber", json!([]))
            .await
            .map_err(ChainError::from)?;
        sequence.parse().map_err(|e| {
            ChainError::InvalidResponse(format!("bad checkpoint sequence '{sequence}': {e}"))
        })
    }

    async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let addresses: HashSet<String> = filters.addresses.iter().cloned().collect();
        let mut records = Vec::new();
        for sequence in from..=to {
            records.extend(self.fetch_checkpoint(sequence, &addresses).await?);
        }
        Ok(records)
    }
}

/// Does the transaction block emit an event from an allow-listed package?
///
/// An empty allow-list keeps everything.
fn block_matches(block: &Value, addresses: &HashSet<String>) -> bool {
    if addresses.is_empty() {
        return true;
    }
    block
        .get("events")
        .and_then(|e| e.as_array())
        .map(|events| {
            events.iter().any(|event| {
                event
                    .get("packageId")
                    .and_then(|p| p.as_str())
                    .is_some_and(|p| addresses.contains(p))
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_filter_matches_emitting_package() {
        let block = json!({
            "digest": "D1",
            "events": [
                { "packageId": "0xaaa", "type": "0xaaa::m::E" },
                { "packageId": "0xbbb", "type": "0xbbb::m::E" },
            ]
        });
        let allow: HashSet<String> = ["0xbbb".to_string()].into();
        assert!(block_matches(&block, &allow));

        let miss: HashSet<String> = ["0xccc".to_string()].into();
        assert!(!block_matches(&block, &miss));
    }

    #[test]
    fn block_without_events_only_passes_unfiltered() {
        let block = json!({ "digest": "D2" });
        assert!(block_matches(&block, &HashSet::new()));

        let allow: HashSet<String> = ["0xaaa".to_string()].into();
        assert!(!block_matches(&block, &allow));
    }
}
