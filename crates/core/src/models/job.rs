//! Job definitions: the typed configuration the core consumes.
//!
//! Jobs are loaded from a declarative file by the binary; the core only sees
//! this parsed structure. Source, mapper, and target kinds are closed sets -
//! an unknown name fails at deserialization time, long before the first tick.

use serde::{Deserialize, Serialize};

use super::{ChainFamily, ChainId, FinalityTag};

/// One polling job: a chain source, filters, and an ordered handler chain.
///
/// Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job identifier; keys the watermark stream.
    pub id: String,
    /// Chain this job watches.
    pub chain_id: ChainId,
    /// Which source adapter to build, with its connection details.
    pub source: SourceKind,
    /// Finality level requested from the chain.
    #[serde(default)]
    pub finality: FinalityTag,
    /// Seconds between ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of chain positions fetched per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Position to start from when no watermark exists yet.
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Address/topic filters applied by the source adapter.
    #[serde(default)]
    pub filters: JobFilters,
    /// Handlers applied to every fetched range, in declared order.
    pub handlers: Vec<HandlerDefinition>,
}

impl JobDefinition {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> u64 {
    100
}

/// Address and topic allow-lists applied at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilters {
    /// Contract/program addresses of interest (empty = no address filter).
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Topic/selector allow-list (EVM topic0 hashes or 4-byte selectors).
    #[serde(default)]
    pub topics: Vec<String>,
    /// Maximum addresses per upstream query; larger sets are split into
    /// filter batches and the results merged.
    #[serde(default = "default_divide_batch_size")]
    pub divide_batch_size: usize,
}

fn default_divide_batch_size() -> usize {
    25
}

impl Default for JobFilters {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            topics: Vec::new(),
            divide_batch_size: default_divide_batch_size(),
        }
    }
}

/// Closed set of source adapters. Unknown kinds fail at parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// EVM JSON-RPC endpoint.
    Evm {
        rpc_url: String,
        /// How "finalized" is resolved on this chain.
        #[serde(default)]
        finality_resolution: FinalityResolution,
        /// What the adapter scans for: logs (default) or full transactions.
        #[serde(default)]
        scan: EvmScan,
    },
    /// Solana JSON-RPC endpoint.
    Solana { rpc_url: String },
    /// Sui JSON-RPC endpoint.
    Sui { rpc_url: String },
    /// Aptos REST endpoint.
    Aptos { rest_url: String },
}

impl SourceKind {
    pub fn family(&self) -> ChainFamily {
        match self {
            SourceKind::Evm { .. } => ChainFamily::Evm,
            SourceKind::Solana { .. } => ChainFamily::Solana,
            SourceKind::Sui { .. } => ChainFamily::Sui,
            SourceKind::Aptos { .. } => ChainFamily::Aptos,
        }
    }
}

/// What an EVM source scans for.
///
/// Log scanning uses `eth_getLogs` with address/topic filters; transaction
/// scanning walks full blocks and filters by to-address and input selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvmScan {
    #[default]
    Logs,
    Transactions,
}

/// Strategy for resolving a finalized height on an EVM chain.
///
/// Most chains expose the `finalized` block tag directly. Chains that only
/// offer a per-block finality predicate (e.g. `moon_isBlockFinalized`) poll
/// the predicate with linearly growing delays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FinalityResolution {
    /// The RPC understands finality block tags natively.
    #[default]
    Tag,
    /// Poll a per-block finality predicate until it confirms.
    Poll {
        #[serde(default = "default_poll_attempts")]
        max_attempts: u32,
        #[serde(default = "default_poll_initial_delay_ms")]
        initial_delay_ms: u64,
        /// Fixed increment added to the delay after every attempt.
        #[serde(default = "default_poll_step_ms")]
        step_ms: u64,
    },
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_initial_delay_ms() -> u64 {
    1_000
}

fn default_poll_step_ms() -> u64 {
    1_000
}

/// One mapper/target pair in a job's handler chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerDefinition {
    pub mapper: MapperKind,
    pub target: TargetKind,
    /// Events per outbound delivery call.
    #[serde(default = "default_delivery_batch_size")]
    pub delivery_batch_size: usize,
}

fn default_delivery_batch_size() -> usize {
    10
}

/// Closed set of mappers, one per chain family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperKind {
    EvmLog,
    EvmTransaction,
    Solana,
    Sui,
    Aptos,
}

impl MapperKind {
    /// Chain family whose payloads this mapper understands.
    pub fn family(&self) -> ChainFamily {
        match self {
            MapperKind::EvmLog | MapperKind::EvmTransaction => ChainFamily::Evm,
            MapperKind::Solana => ChainFamily::Solana,
            MapperKind::Sui => ChainFamily::Sui,
            MapperKind::Aptos => ChainFamily::Aptos,
        }
    }
}

/// Closed set of delivery targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// HTTP pub/sub topic publisher.
    PubSub { endpoint: String, topic: String },
    /// No-op sink that only logs. Used for dry-run deployments.
    Sink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_definition_parses_with_defaults() {
        let yaml_as_json = serde_json::json!({
            "id": "eth-messages",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://localhost:8545" },
            "handlers": [
                { "mapper": "evm_log", "target": { "kind": "sink" } }
            ]
        });

        let job: JobDefinition = serde_json::from_value(yaml_as_json).unwrap();
        assert_eq!(job.poll_interval_secs, 10);
        assert_eq!(job.batch_size, 100);
        assert_eq!(job.filters.divide_batch_size, 25);
        assert_eq!(job.finality, FinalityTag::Finalized);
        assert!(matches!(
            job.source,
            SourceKind::Evm {
                finality_resolution: FinalityResolution::Tag,
                ..
            }
        ));
    }

    // Test critique: un nom de source inconnu échoue au chargement,
    // pas au premier tick
    #[test]
    fn unknown_source_kind_fails_at_parse() {
        let bad = serde_json::json!({
            "id": "job",
            "chain_id": 2,
            "source": { "kind": "bitcoin", "rpc_url": "http://x" },
            "handlers": []
        });
        assert!(serde_json::from_value::<JobDefinition>(bad).is_err());
    }

    #[test]
    fn unknown_mapper_kind_fails_at_parse() {
        let bad = serde_json::json!({
            "id": "job",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://x" },
            "handlers": [ { "mapper": "cosmos", "target": { "kind": "sink" } } ]
        });
        assert!(serde_json::from_value::<JobDefinition>(bad).is_err());
    }

    #[test]
    fn finality_poll_resolution_parses() {
        let json = serde_json::json!({
            "kind": "evm",
            "rpc_url": "http://x",
            "finality_resolution": { "strategy": "poll", "max_attempts": 5 }
        });
        let source: SourceKind = serde_json::from_value(json).unwrap();
        match source {
            SourceKind::Evm {
                finality_resolution: FinalityResolution::Poll { max_attempts, step_ms, .. },
                ..
            } => {
                assert_eq!(max_attempts, 5);
                assert_eq!(step_ms, 1_000);
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }
}
