//! Domain models for the event watcher.
//!
//! These models are chain-agnostic and storage-agnostic: adapters produce
//! [`RawChainRecord`]s, mappers turn them into [`NormalizedEvent`]s, and the
//! poller tracks progress through [`Watermark`]s.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod job;

pub use job::{
    EvmScan, FinalityResolution, HandlerDefinition, JobDefinition, JobFilters, MapperKind,
    SourceKind, TargetKind,
};

// =============================================================================
// Chain Identification
// =============================================================================

/// Numeric chain identifier shared across the cross-chain protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u16);

impl ChainId {
    pub const SOLANA: ChainId = ChainId(1);
    pub const ETHEREUM: ChainId = ChainId(2);
    pub const POLYGON: ChainId = ChainId(5);
    pub const MOONBEAM: ChainId = ChainId(16);
    pub const SUI: ChainId = ChainId(21);
    pub const APTOS: ChainId = ChainId(22);
    pub const BASE: ChainId = ChainId(30);
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain families group chains that share an RPC shape and finality model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    Evm,
    Solana,
    Sui,
    Aptos,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
            ChainFamily::Sui => "sui",
            ChainFamily::Aptos => "aptos",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Finality
// =============================================================================

/// Named finality level requested from a chain.
///
/// Each adapter translates the tag into its chain's native vocabulary
/// (EVM block tags, Solana commitments, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinalityTag {
    /// Newest block the node has seen - may be reverted.
    Latest,
    /// Unlikely to be reverted, not yet guaranteed.
    Safe,
    /// Guaranteed by consensus rules not to be reverted.
    #[default]
    Finalized,
}

impl FinalityTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalityTag::Latest => "latest",
            FinalityTag::Safe => "safe",
            FinalityTag::Finalized => "finalized",
        }
    }
}

impl fmt::Display for FinalityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Raw Chain Records
// =============================================================================

/// Chain-specific unit of work produced by a source adapter.
///
/// Ephemeral: consumed immediately by the mappers, never persisted. The
/// `payload` keeps the adapter's raw JSON so mappers can match chain-native
/// discriminators without the core layer knowing about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChainRecord {
    /// Chain the record came from.
    pub chain_id: ChainId,
    /// Native transaction hash / signature / digest.
    pub tx_hash: String,
    /// Block height, slot, checkpoint, or ledger version.
    pub block_height: u64,
    /// Block timestamp, when the chain exposes one.
    pub block_time: Option<DateTime<Utc>>,
    /// Position within the block; preserves same-block relative order.
    pub index_in_block: u32,
    /// Raw chain data (log, transaction, event) as returned by the RPC.
    pub payload: serde_json::Value,
}

impl RawChainRecord {
    /// Content hash used to deduplicate records that overlapping filter
    /// batches may return more than once.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.chain_id.0.to_be_bytes());
        hasher.update(self.tx_hash.as_bytes());
        hasher.update(self.block_height.to_be_bytes());
        hasher.update(self.index_in_block.to_be_bytes());
        hasher.update(self.payload.to_string().as_bytes());
        hasher.finalize().into()
    }
}

// =============================================================================
// Normalized Events
// =============================================================================

/// Canonical, chain-agnostic representation of a detected on-chain
/// occurrence. This is the unit crossing the trust boundary into delivery.
///
/// Downstream consumers key idempotency off `(chain_id, tx_hash, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Event name, e.g. `log-message-published` or `transfer-redeemed`.
    pub name: String,
    /// Chain the event was observed on.
    pub chain_id: ChainId,
    /// Emitting contract/program address, canonicalized.
    pub address: String,
    /// Native transaction hash.
    pub tx_hash: String,
    /// Block height / slot / checkpoint / ledger version.
    pub block_height: u64,
    /// Block timestamp, when known.
    pub block_time: Option<DateTime<Utc>>,
    /// Open mapping of event-specific fields (sender, sequence, payload,
    /// nonce, consistency level, method name, ...).
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedEvent {
    /// Identity key downstream consumers dedup on.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.chain_id, self.tx_hash, self.name)
    }

    /// Content fingerprint of the serialized canonical event.
    ///
    /// Used by the delivery handler to drop duplicates within a batch
    /// before they reach the target.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.identity().as_bytes());
        hasher.update(self.block_height.to_be_bytes());
        hasher.update(
            serde_json::to_string(&self.attributes)
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.finalize().into()
    }
}

// =============================================================================
// Watermark
// =============================================================================

/// Last chain position known to be fully processed for a job.
///
/// The sole resumption point after restart. Written only after the
/// corresponding range has been mapped and delivered to every configured
/// target; monotonically non-decreasing under normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Job this watermark belongs to.
    pub job_id: String,
    /// Chain-native ordinal: block number, slot, or ledger version.
    pub position: u64,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(job_id: impl Into<String>, position: u64) -> Self {
        Self {
            job_id: job_id.into(),
            position,
            updated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tx: &str, height: u64, index: u32) -> RawChainRecord {
        RawChainRecord {
            chain_id: ChainId::ETHEREUM,
            tx_hash: tx.to_string(),
            block_height: height,
            block_time: None,
            index_in_block: index,
            payload: serde_json::json!({"topics": []}),
        }
    }

    #[test]
    fn finality_tag_round_trip() {
        for tag in [FinalityTag::Latest, FinalityTag::Safe, FinalityTag::Finalized] {
            let json = serde_json::to_string(&tag).unwrap();
            let back: FinalityTag = serde_json::from_str(&json).unwrap();
            assert_eq!(tag, back);
        }
    }

    #[test]
    fn record_fingerprint_is_content_addressed() {
        let a = record("0xabc", 100, 0);
        let b = record("0xabc", 100, 0);
        let c = record("0xabc", 100, 1);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    // Test critique: le fingerprint change avec les attributs, pas avec
    // l'horodatage d'observation
    #[test]
    fn event_fingerprint_depends_on_attributes() {
        let mut attributes = serde_json::Map::new();
        attributes.insert("sequence".into(), serde_json::json!(7));

        let mut event = NormalizedEvent {
            name: "log-message-published".into(),
            chain_id: ChainId::ETHEREUM,
            address: "0xdead".into(),
            tx_hash: "0xabc".into(),
            block_height: 100,
            block_time: None,
            attributes,
        };
        let first = event.fingerprint();

        event.attributes.insert("sequence".into(), serde_json::json!(8));
        assert_ne!(first, event.fingerprint());
    }

    #[test]
    fn event_identity_key() {
        let event = NormalizedEvent {
            name: "transfer-redeemed".into(),
            chain_id: ChainId::APTOS,
            address: "0x1".into(),
            tx_hash: "0xfeed".into(),
            block_height: 42,
            block_time: None,
            attributes: serde_json::Map::new(),
        };
        assert_eq!(event.identity(), "22/0xfeed/transfer-redeemed");
    }
}
