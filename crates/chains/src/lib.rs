//! Chain source adapters for the Watchtower event watcher.
//!
//! This crate implements the [`ChainSource`] port from `watchtower-core`
//! for four chain families, each speaking its native RPC dialect:
//!
//! - [`EvmSource`] - JSON-RPC (`eth_getLogs`, block tags, optional
//!   finality-predicate polling for chains without a `finalized` tag)
//! - [`SolanaSource`] - JSON-RPC (`getSlot`/`getBlock` with commitments)
//! - [`SuiSource`] - JSON-RPC (checkpoint sequence numbers)
//! - [`AptosSource`] - REST (ledger versions)
//!
//! All adapters share one [`rpc::RpcClient`] built on reqwest with per-call
//! timeouts, so one slow chain cannot starve the others, and all are
//! stateless with respect to the watermark.
//!
//! [`ChainSource`]: watchtower_core::ports::ChainSource

mod aptos;
mod evm;
mod finality;
mod rpc;
mod solana;
mod sui;

pub use aptos::AptosSource;
pub use evm::EvmSource;
pub use finality::{resolve_finalized_height, FinalityPollPolicy, FinalityProbe};
pub use rpc::{RpcClient, RpcClientConfig};
pub use solana::SolanaSource;
pub use sui::SuiSource;
