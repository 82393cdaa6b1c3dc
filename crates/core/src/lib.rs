//! Core domain layer for the Watchtower event watcher.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services for the multi-chain event watcher. It follows
//! hexagonal architecture principles - this is the innermost layer with
//! no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   watchtower (binary)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  watchtower-chains  │  watchtower-handlers                  │
//! │    (RPC adapters)   │  (mappers, delivery, targets)         │
//! ├─────────────────────┴───────────────────────────────────────┤
//! │                   watchtower-storage                        │
//! │                 (watermark persistence)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   watchtower-core  ← YOU ARE HERE           │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (NormalizedEvent, Watermark, JobDefinition, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Core business logic (Poller)
//! - [`retry`] - Shared linear-backoff retry policy
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::ChainSource`] - Query a chain for heights and activity ranges
//! - [`ports::WatermarkStore`] - Persist per-job progress with CAS semantics
//! - [`ports::Mapper`] - Pure transform from raw chain records to events
//! - [`ports::Target`] - Downstream delivery endpoint for normalized events
//! - [`ports::Handler`] - Dedup/batch/deliver pipeline stage
//!
//! ## Polling Lifecycle
//!
//! Each configured job runs one [`services::Poller`] loop:
//!
//! 1. Read the job's watermark and the chain's current finalized height
//! 2. Fetch the next bounded range of raw records from the chain
//! 3. Hand the records to every configured handler, in declared order
//! 4. Commit a new watermark only after every handler succeeded
//!
//! A failed tick never advances the watermark: the same range is retried on
//! the next tick, giving at-least-once delivery with range granularity.

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod retry;
pub mod services;
