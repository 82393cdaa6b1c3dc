//! Solana chain source adapter.
//!
//! Positions are slots, not block heights; the finality tag maps onto
//! Solana commitment levels. Slots with no block (skipped by the leader)
//! are a normal part of the ledger and yield no records.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, trace};

use watchtower_core::error::{ChainError, ChainResult};
use watchtower_core::models::{ChainId, FinalityTag, JobFilters, RawChainRecord};
use watchtower_core::ports::ChainSource;

use crate::rpc::{RpcCallError, RpcClient, RpcClientConfig};

// Codes returned by getBlock for slots the cluster skipped.
const SLOT_SKIPPED: i64 = -32007;
const SLOT_SKIPPED_LONG_TERM: i64 = -32009;

/// Solana JSON-RPC source adapter.
pub struct SolanaSource {
    rpc: RpcClient,
    chain_id: ChainId,
}

impl SolanaSource {
    pub fn new(config: RpcClientConfig, chain_id: ChainId) -> Self {
        Self {
            rpc: RpcClient::new(config),
            chain_id,
        }
    }

    async fn fetch_slot(
        &self,
        slot: u64,
        addresses: &HashSet<String>,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let params = json!([slot, {
            "encoding": "json",
            "transactionDetails": "full",
            "rewards": false,
            "maxSupportedTransactionVersion": 0,
        }]);
        let block: Value = match self.rpc.call("getBlock", params).await {
            Ok(block) => block,
            Err(RpcCallError::Rpc { code, .. })
                if code == SLOT_SKIPPED || code == SLOT_SKIPPED_LONG_TERM =>
            {
                // Skipped slot: nothing was produced there.
                debug!(slot, "Slot skipped by the cluster");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let block_time = block
            .get("blockTime")
            .and_then(|t| t.as_i64())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let transactions = block
            .get("transactions")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::new();
        for (index, tx) in transactions.into_iter().enumerate() {
            if !transaction_touches(&tx, addresses) {
                continue;
            }
            let signature = tx
                .pointer("/transaction/signatures/0")
                .and_then(|s| s.as_str())
                .ok_or_else(|| {
                    ChainError::InvalidResponse(format!("transaction without signature in slot {slot}"))
                })?
                .to_string();

            records.push(RawChainRecord {
                chain_id: self.chain_id,
                tx_hash: signature,
                block_height: slot,
                block_time,
                index_in_block: index as u32,
                payload: tx,
            });
        }
        trace!(slot, count = records.len(), "Slot fetched");
        Ok(records)
    }
}

#[async_trait]
impl ChainSource for SolanaSource {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn current_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        let commitment = commitment_for(finality);
        let slot: u64 = self
            .rpc
            .call("getSlot", json!([{ "commitment": commitment }]))
            .await
            .map_err(ChainError::from)?;
        Ok(slot)
    }

    async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let addresses: HashSet<String> = filters.addresses.iter().cloned().collect();
        let mut records = Vec::new();
        for slot in from..=to {
            records.extend(self.fetch_slot(slot, &addresses).await?);
        }
        Ok(records)
    }
}

/// Map the portable finality tag onto a Solana commitment level.
fn commitment_for(finality: FinalityTag) -> &'static str {
    match finality {
        FinalityTag::Latest => "processed",
        FinalityTag::Safe => "confirmed",
        FinalityTag::Finalized => "finalized",
    }
}

/// Does any account key of the transaction appear in the allow-list?
///
/// An empty allow-list keeps everything.
fn transaction_touches(tx: &Value, addresses: &HashSet<String>) -> bool {
    if addresses.is_empty() {
        return true;
    }
    tx.pointer("/transaction/message/accountKeys")
        .and_then(|k| k.as_array())
        .map(|keys| {
            keys.iter()
                .filter_map(|k| k.as_str())
                .any(|k| addresses.contains(k))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finality_tags_map_to_commitment_levels() {
        assert_eq!(commitment_for(FinalityTag::Latest), "processed");
        assert_eq!(commitment_for(FinalityTag::Safe), "confirmed");
        assert_eq!(commitment_for(FinalityTag::Finalized), "finalized");
    }

    #[test]
    fn account_key_filter_matches_any_key() {
        let tx = json!({
            "transaction": {
                "signatures": ["5sig"],
                "message": { "accountKeys": ["AaaKey", "BbbProgram"] }
            }
        });
        let allow: HashSet<String> = ["BbbProgram".to_string()].into();
        assert!(transaction_touches(&tx, &allow));

        let miss: HashSet<String> = ["CccOther".to_string()].into();
        assert!(!transaction_touches(&tx, &miss));
    }

    #[test]
    fn empty_allow_list_keeps_everything() {
        let tx = json!({ "transaction": { "message": { "accountKeys": [] } } });
        assert!(transaction_touches(&tx, &HashSet::new()));
    }
}
