//! Per-chain-family mappers.
//!
//! Each mapper is a pure function from one raw record to zero-or-more
//! canonical events. "Not the event we watch for" is an empty vec; an error
//! means the record matched a discriminator but was missing required data.

mod aptos;
mod evm;
mod normalize;
mod solana;
mod sui;

pub use aptos::AptosEventMapper;
pub use evm::{EvmLogMapper, EvmTransactionMapper};
pub use solana::SolanaMessageMapper;
pub use sui::SuiEventMapper;

use watchtower_core::models::MapperKind;
use watchtower_core::ports::Mapper;

/// Instantiate the mapper for a declared kind.
pub fn build_mapper(kind: MapperKind) -> Box<dyn Mapper> {
    match kind {
        MapperKind::EvmLog => Box::new(EvmLogMapper),
        MapperKind::EvmTransaction => Box::new(EvmTransactionMapper),
        MapperKind::Solana => Box::new(SolanaMessageMapper),
        MapperKind::Sui => Box::new(SuiEventMapper),
        MapperKind::Aptos => Box::new(AptosEventMapper),
    }
}
