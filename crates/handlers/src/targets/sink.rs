//! No-op logging sink, used for dry-run deployments.

use async_trait::async_trait;
use tracing::info;

use watchtower_core::error::DeliveryResult;
use watchtower_core::models::NormalizedEvent;
use watchtower_core::ports::Target;

/// Logs event identities instead of delivering them. Never fails.
pub struct SinkTarget;

#[async_trait]
impl Target for SinkTarget {
    fn name(&self) -> &'static str {
        "sink"
    }

    async fn deliver(&self, events: &[NormalizedEvent]) -> DeliveryResult<()> {
        for event in events {
            info!(
                identity = %event.identity(),
                block = event.block_height,
                "📭 Event discarded (dry-run)"
            );
        }
        Ok(())
    }
}
