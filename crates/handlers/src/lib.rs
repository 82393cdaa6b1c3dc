//! Mappers and delivery targets for Watchtower.
//!
//! This crate implements the transform/deliver half of the pipeline behind
//! the `watchtower-core` port traits:
//!
//! - [`mappers`] - pure per-chain-family transforms from raw records to
//!   canonical events
//! - [`targets`] - outbound delivery endpoints (HTTP pub/sub, no-op sink)
//! - [`delivery::EventHandler`] - the glue stage: map, dedup, batch, deliver
//!
//! # Wiring
//!
//! ```ignore
//! use watchtower_handlers::build_handler;
//!
//! let handlers: Vec<Arc<dyn Handler>> = job
//!     .handlers
//!     .iter()
//!     .map(|def| build_handler(def, dry_run))
//!     .collect();
//! ```

pub mod delivery;
pub mod mappers;
pub mod targets;

use std::sync::Arc;

use watchtower_core::models::{HandlerDefinition, TargetKind};
use watchtower_core::ports::Handler;

use delivery::EventHandler;

/// Build one handler-chain stage from its declarative definition.
///
/// `dry_run` swaps the configured target for the logging sink at
/// construction time; the handler contract is identical in both modes.
pub fn build_handler(definition: &HandlerDefinition, dry_run: bool) -> Arc<dyn Handler> {
    let mapper = mappers::build_mapper(definition.mapper);
    let target = if dry_run {
        targets::build_target(&TargetKind::Sink)
    } else {
        targets::build_target(&definition.target)
    };
    Arc::new(EventHandler::new(
        mapper,
        target,
        definition.delivery_batch_size,
    ))
}
