//! Aptos chain source adapter.
//!
//! Speaks the fullnode REST API rather than JSON-RPC. Positions are
//! ledger versions (global transaction sequence numbers), and the node
//! only serves committed state, so every finality tag resolves to the
//! current ledger version.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use watchtower_core::error::{ChainError, ChainResult};
use watchtower_core::models::{ChainId, FinalityTag, JobFilters, RawChainRecord};
use watchtower_core::ports::ChainSource;

use crate::rpc::{RpcClient, RpcClientConfig};

// The fullnode rejects page sizes above 100.
const PAGE_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
struct LedgerInfo {
    ledger_version: String,
}

/// Aptos fullnode REST source adapter.
pub struct AptosSource {
    rpc: RpcClient,
    chain_id: ChainId,
}

impl AptosSource {
    pub fn new(config: RpcClientConfig, chain_id: ChainId) -> Self {
        Self {
            rpc: RpcClient::new(config),
            chain_id,
        }
    }
}

#[async_trait]
impl ChainSource for AptosSource {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn current_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
        let info: LedgerInfo = self.rpc.get("/v1").await.map_err(ChainError::from)?;
        info.ledger_version.parse().map_err(|e| {
            ChainError::InvalidResponse(format!(
                "bad ledger version '{}': {e}",
                info.ledger_version
            ))
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
        let mut cursor = from;
        while cursor <= to {
            let limit = PAGE_LIMIT.min(to - cursor + 1);
            let path = format!("/v1/transactions?start={cursor}&limit={limit}");
            let page: Vec<Value> = self.rpc.get(&path).await.map_err(ChainError::from)?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as u64;

            for tx in page {
                let Some(version) = tx
                    .get("version")
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse::<u64>().ok())
                else {
                    // Pending transactions carry no version; skip them.
                    continue;
                };
                if version > to {
                    break;
                }
                if !transaction_touches(&tx, &addresses) {
                    continue;
                }
                let hash = tx
                    .get("hash")
                    .and_then(|h| h.as_str())
                    .ok_or_else(|| {
                        ChainError::InvalidResponse(format!("transaction {version} without hash"))
                    })?
                    .to_string();

                records.push(RawChainRecord {
                    chain_id: self.chain_id,
                    tx_hash: hash,
                    block_height: version,
                    block_time: parse_timestamp_usecs(&tx),
                    // Versions are globally ordered; one transaction per position.
                    index_in_block: 0,
                    payload: tx,
                });
            }
            cursor += fetched;
        }
        trace!(from, to, count = records.len(), "Version range fetched");
        Ok(records)
    }
}

/// The REST API reports timestamps as decimal strings of microseconds.
fn parse_timestamp_usecs(tx: &Value) -> Option<DateTime<Utc>> {
    let usecs: i64 = tx.get("timestamp")?.as_str()?.parse().ok()?;
    DateTime::<Utc>::from_timestamp_micros(usecs)
}

/// Does the transaction touch an allow-listed account, either as sender
/// or through an emitted event's account address?
fn transaction_touches(tx: &Value, addresses: &HashSet<String>) -> bool {
    if addresses.is_empty() {
        return true;
    }
    if tx
        .get("sender")
        .and_then(|s| s.as_str())
        .is_some_and(|s| addresses.contains(s))
    {
        return true;
    }
    tx.get("events")
        .and_then(|e| e.as_array())
        .map(|events| {
            events.iter().any(|event| {
                event
                    .pointer("/guid/account_address")
                    .and_then(|a| a.as_str())
                    .is_some_and(|a| addresses.contains(a))
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_is_microseconds_since_epoch() {
        let tx = json!({ "timestamp": "1700000000000000" });
        let time = parse_timestamp_usecs(&tx).unwrap();
        assert_eq!(time.timestamp(), 1_700_000_000);
    }

    #[test]
    fn event_account_matches_allow_list() {
        let tx = json!({
            "sender": "0x1",
            "events": [{ "guid": { "account_address": "0xbridge" }, "data": {} }]
        });
        let allow: HashSet<String> = ["0xbridge".to_string()].into();
        assert!(transaction_touches(&tx, &allow));

        let miss: HashSet<String> = ["0xother".to_string()].into();
        assert!(!transaction_touches(&tx, &miss));
    }

    #[test]
    fn sender_alone_is_enough() {
        let tx = json!({ "sender": "0xbridge" });
        let allow: HashSet<String> = ["0xbridge".to_string()].into();
        assert!(transaction_touches(&tx, &allow));
    }
}
