//! Core business logic services.

mod poller;

pub use poller::{Poller, PollerConfig, TickOutcome};
