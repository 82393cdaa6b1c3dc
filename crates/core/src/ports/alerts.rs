//! Alerting hook for operator-visible failures.

use async_trait::async_trait;
use tracing::error;

use crate::models::ChainId;

/// Operator alert raised by the poller.
#[derive(Debug, Clone)]
pub enum Alert {
    /// A fetch exhausted its retry budget for a range.
    RangeExhausted {
        job_id: String,
        chain_id: ChainId,
        from: u64,
        to: u64,
        reason: String,
    },
    /// Finality polling gave up on a candidate height.
    FinalityUnresolved {
        job_id: String,
        chain_id: ChainId,
        height: u64,
    },
    /// A handler kept failing for the same range across ticks.
    HandlerFailing {
        job_id: String,
        chain_id: ChainId,
        handler: String,
        consecutive_failures: u32,
    },
}

/// Sink for operator alerts.
///
/// Transport mechanics live outside the core; the shipped implementation
/// only logs. Must never fail the calling path.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: Alert);
}

/// Default alert sink: structured error logs.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: Alert) {
        match alert {
            Alert::RangeExhausted {
                job_id,
                chain_id,
                from,
                to,
                reason,
            } => error!(
                job = %job_id,
                chain = %chain_id,
                from,
                to,
                reason = %reason,
                "🚨 Range fetch exhausted retry budget"
            ),
            Alert::FinalityUnresolved {
                job_id,
                chain_id,
                height,
            } => error!(
                job = %job_id,
                chain = %chain_id,
                height,
                "🚨 Finality never confirmed for candidate height"
            ),
            Alert::HandlerFailing {
                job_id,
                chain_id,
                handler,
                consecutive_failures,
            } => error!(
                job = %job_id,
                chain = %chain_id,
                handler = %handler,
                consecutive_failures,
                "🚨 Handler failing repeatedly for the same range"
            ),
        }
    }
}
