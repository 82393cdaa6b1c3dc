//! Metrics definitions for the watcher.
//!
//! This module defines all metrics used throughout the watcher.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.
//!
//! Counters are keyed by `(chain, event)` so operators can tell
//! "chain lagging" apart from "integration broken": a lagging chain shows
//! idle ticks, a broken integration shows `ranges_failed_total` climbing
//! for the same job.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

use crate::models::ChainId;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "events_processed_total",
        "Total number of raw records mapped into normalized events"
    );
    describe_counter!(
        "events_delivered_total",
        "Total number of normalized events delivered to a target"
    );
    describe_counter!(
        "events_failed_total",
        "Total number of normalized events whose delivery failed"
    );
    describe_counter!(
        "mapping_errors_total",
        "Total number of malformed records rejected by a mapper"
    );
    describe_counter!(
        "ranges_failed_total",
        "Total number of ticks that failed without advancing the watermark"
    );
    describe_counter!(
        "finality_unresolved_total",
        "Total number of finality polls that exhausted their attempt budget"
    );
    describe_gauge!(
        "watermark_position",
        "Last committed chain position per job"
    );
    describe_histogram!(
        "tick_duration_seconds",
        "Time taken to process one poll tick in seconds"
    );
}

/// Record events produced for a `(chain, event)` pair.
pub fn record_events_processed(chain: ChainId, event: &str, count: u64) {
    counter!("events_processed_total", "chain" => chain.to_string(), "event" => event.to_string())
        .increment(count);
}

/// Record events successfully delivered to a target.
pub fn record_events_delivered(chain: ChainId, target: &str, count: u64) {
    counter!("events_delivered_total", "chain" => chain.to_string(), "target" => target.to_string())
        .increment(count);
}

/// Record events whose delivery failed.
pub fn record_events_failed(chain: ChainId, target: &str, count: u64) {
    counter!("events_failed_total", "chain" => chain.to_string(), "target" => target.to_string())
        .increment(count);
}

/// Record a malformed record rejected by a mapper.
pub fn record_mapping_error(chain: ChainId, mapper: &str) {
    counter!("mapping_errors_total", "chain" => chain.to_string(), "mapper" => mapper.to_string())
        .increment(1);
}

/// Record a tick that failed without advancing the watermark.
pub fn record_range_failed(job_id: &str, chain: ChainId) {
    counter!("ranges_failed_total", "job" => job_id.to_string(), "chain" => chain.to_string())
        .increment(1);
}

/// Record an exhausted finality poll.
pub fn record_finality_unresolved(chain: ChainId) {
    counter!("finality_unresolved_total", "chain" => chain.to_string()).increment(1);
}

/// Record the last committed watermark position for a job.
pub fn record_watermark_position(job_id: &str, position: u64) {
    gauge!("watermark_position", "job" => job_id.to_string()).set(position as f64);
}

/// Record tick processing duration.
pub fn record_tick_duration(duration_secs: f64) {
    histogram!("tick_duration_seconds").record(duration_secs);
}

/// A timer that automatically records tick duration when dropped.
pub struct TickTimer {
    start: Instant,
}

impl TickTimer {
    /// Start a new tick timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        record_tick_duration(self.start.elapsed().as_secs_f64());
    }
}
