//! EVM chain source adapter.
//!
//! Speaks plain JSON-RPC: heights via block tags (`latest`/`safe`/
//! `finalized`), activity via `eth_getLogs` or full-block transaction
//! scans. Chains without a native `finalized` tag (Moonbeam-style) resolve
//! finality through the predicate poll in [`crate::finality`].

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, trace};

use watchtower_core::error::{ChainError, ChainResult};
use watchtower_core::models::{
    ChainId, EvmScan, FinalityResolution, FinalityTag, JobFilters, RawChainRecord,
};
use watchtower_core::ports::ChainSource;

use crate::finality::{resolve_finalized_height, FinalityPollPolicy, FinalityProbe};
use crate::rpc::{parse_hex_u64, RpcClient, RpcClientConfig};

/// EVM JSON-RPC source adapter.
pub struct EvmSource {
    rpc: RpcClient,
    chain_id: ChainId,
    scan: EvmScan,
    finality_poll: Option<FinalityPollPolicy>,
}

impl EvmSource {
    pub fn new(
        config: RpcClientConfig,
        chain_id: ChainId,
        scan: EvmScan,
        finality_resolution: &FinalityResolution,
    ) -> Self {
        Self {
            rpc: RpcClient::new(config),
            chain_id,
            scan,
            finality_poll: FinalityPollPolicy::from_resolution(finality_resolution),
        }
    }

    async fn height_by_tag(&self, tag: &str) -> ChainResult<u64> {
        let block: Value = self
            .rpc
            .call("eth_getBlockByNumber", json!([tag, false]))
            .await
            .map_err(ChainError::from)?;
        let number = block
            .get("number")
            .and_then(|n| n.as_str())
            .ok_or_else(|| ChainError::InvalidResponse(format!("block for tag '{tag}' has no number")))?;
        Ok(parse_hex_u64(number)?)
    }

    /// Fetch logs for `[from, to]`, splitting large address sets into
    /// filter batches and merging the results without duplicates.
    async fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let topics = if filters.topics.is_empty() {
            Value::Null
        } else {
            // topic0 alternatives: any of the allow-listed signatures.
            json!([filters.topics])
        };

        let mut batches = Vec::new();
        for chunk in chunk_addresses(&filters.addresses, filters.divide_batch_size) {
            let mut filter = json!({
                "fromBlock": format!("0x{from:x}"),
                "toBlock": format!("0x{to:x}"),
            });
            if let Some(addresses) = chunk {
                filter["address"] = json!(addresses);
            }
            if !topics.is_null() {
                filter["topics"] = topics.clone();
            }

            let logs: Vec<Value> = self
                .rpc
                .call("eth_getLogs", json!([filter]))
                .await
                .map_err(ChainError::from)?;
            trace!(count = logs.len(), "Filter batch fetched");

            let mut records = Vec::with_capacity(logs.len());
            for log in logs {
                records.push(self.log_to_record(log)?);
            }
            batches.push(records);
        }

        let mut records = merge_deduped(batches);
        self.attach_block_times(&mut records).await?;
        Ok(records)
    }

    /// Walk full blocks and keep transactions matching the to-address and
    /// input-selector allow-lists.
    async fn fetch_transactions(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>> {
        let addresses: HashSet<String> =
            filters.addresses.iter().map(|a| a.to_lowercase()).collect();

        let mut records = Vec::new();
        for height in from..=to {
            let block: Option<Value> = self
                .rpc
                .call("eth_getBlockByNumber", json!([format!("0x{height:x}"), true]))
                .await
                .map_err(ChainError::from)?;
            let Some(block) = block else {
                debug!(height, "Block not yet available, skipping");
                continue;
            };

            let block_time = block
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(|t| parse_hex_u64(t).ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

            let transactions = block
                .get("transactions")
                .and_then(|t| t.as_array())
                .cloned()
                .unwrap_or_default();

            for (index, tx) in transactions.into_iter().enumerate() {
                if !transaction_matches(&tx, &addresses, &filters.topics) {
                    continue;
                }
                let tx_hash = tx
                    .get("hash")
                    .and_then(|h| h.as_str())
                    .ok_or_else(|| {
                        ChainError::InvalidResponse(format!("transaction without hash at {height}"))
                    })?
                    .to_string();

                records.push(RawChainRecord {
                    chain_id: self.chain_id,
                    tx_hash,
                    block_height: height,
                    block_time,
                    index_in_block: index as u32,
                    payload: tx,
                });
            }
        }
        Ok(records)
    }

    fn log_to_record(&self, log: Value) -> ChainResult<RawChainRecord> {
        let tx_hash = log
            .get("transactionHash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| ChainError::InvalidResponse("log without transactionHash".into()))?
            .to_string();
        let block_height = log
            .get("blockNumber")
            .and_then(|n| n.as_str())
            .ok_or_else(|| ChainError::InvalidResponse("log without blockNumber".into()))
            .and_then(|n| Ok(parse_hex_u64(n)?))?;
        let index_in_block = log
            .get("logIndex")
            .and_then(|i| i.as_str())
            .and_then(|i| parse_hex_u64(i).ok())
            .unwrap_or(0) as u32;

        Ok(RawChainRecord {
            chain_id: self.chain_id,
            tx_hash,
            block_height,
            block_time: None,
            index_in_block,
            payload: log,
        })
    }

    /// Logs carry no timestamps; fetch each distinct block header once.
    async fn attach_block_times(&self, records: &mut [RawChainRecord]) -> ChainResult<()> {
        let heights: BTreeSet<u64> = records.iter().map(|r| r.block_height).collect();
        let mut times: HashMap<u64, Option<DateTime<Utc>>> = HashMap::new();

        for height in heights {
            let block: Option<Value> = self
                .rpc
                .call("eth_getBlockByNumber", json!([format!("0x{height:x}"), false]))
                .await
                .map_err(ChainError::from)?;
            let time = block
                .as_ref()
                .and_then(|b| b.get("timestamp"))
                .and_then(|t| t.as_str())
                .and_then(|t| parse_hex_u64(t).ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
            times.insert(height, time);
        }

        for record in records {
            record.block_time = times.get(&record.block_height).copied().flatten();
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSource for EvmSource {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn current_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        match (finality, &self.finality_poll) {
            // No finalized tag on this chain: poll the per-block predicate.
            (FinalityTag::Finalized, Some(policy)) => {
                resolve_finalized_height(self, policy).await
            }
            (tag, _) => self.height_by_tag(tag.as_str()).await,
        }
    }

    async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        filters: &JobFilters,
    ) -> ChainResult<Vec<RawChainRecord>> {
        match self.scan {
            EvmScan::Logs => self.fetch_logs(from, to, filters).await,
            EvmScan::Transactions => self.fetch_transactions(from, to, filters).await,
        }
    }
}

#[async_trait]
impl FinalityProbe for EvmSource {
    async fn candidate_height(&self) -> ChainResult<u64> {
        self.height_by_tag("latest").await
    }

    async fn block_hash(&self, height: u64) -> ChainResult<String> {
        let block: Value = self
            .rpc
            .call("eth_getBlockByNumber", json!([format!("0x{height:x}"), false]))
            .await
            .map_err(ChainError::from)?;
        block
            .get("hash")
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse(format!("block {height} has no hash")))
    }

    async fn is_finalized(&self, hash: &str) -> ChainResult<bool> {
        self.rpc
            .call("moon_isBlockFinalized", json!([hash]))
            .await
            .map_err(ChainError::from)
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Split an address allow-list into fixed-size filter batches.
///
/// An empty allow-list yields one unfiltered query (`None`).
fn chunk_addresses(addresses: &[String], batch_size: usize) -> Vec<Option<Vec<String>>> {
    if addresses.is_empty() {
        return vec![None];
    }
    addresses
        .chunks(batch_size.max(1))
        .map(|chunk| Some(chunk.to_vec()))
        .collect()
}

/// Merge filter-batch results, dropping duplicates by content fingerprint
/// and restoring `(block, index)` order so same-block relative order holds.
fn merge_deduped(batches: Vec<Vec<RawChainRecord>>) -> Vec<RawChainRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<RawChainRecord> = batches
        .into_iter()
        .flatten()
        .filter(|record| seen.insert(record.fingerprint()))
        .collect();
    merged.sort_by_key(|r| (r.block_height, r.index_in_block));
    merged
}

/// Does a transaction pass the to-address and selector allow-lists?
fn transaction_matches(tx: &Value, addresses: &HashSet<String>, selectors: &[String]) -> bool {
    if !addresses.is_empty() {
        let to = tx
            .get("to")
            .and_then(|t| t.as_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !addresses.contains(&to) {
            return false;
        }
    }
    if !selectors.is_empty() {
        let input = tx.get("input").and_then(|i| i.as_str()).unwrap_or("");
        return selectors
            .iter()
            .any(|s| input.to_lowercase().starts_with(&s.to_lowercase()));
    }
    true
}

// =============================================================================
// Tests
// =============================================================================
