//! HTTP pub/sub publisher target.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use watchtower_core::error::{DeliveryError, DeliveryResult};
use watchtower_core::models::NormalizedEvent;
use watchtower_core::ports::Target;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

/// Publishes event batches to an HTTP pub/sub topic.
///
/// All-or-nothing per call: the broker either acknowledges the whole
/// batch with a 2xx or the batch counts as undelivered.
pub struct PubSubTarget {
    client: reqwest::Client,
    endpoint: String,
    topic: String,
}

impl PubSubTarget {
    pub fn new(endpoint: String, topic: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(PUBLISH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint,
            topic,
        }
    }
}

#[async_trait]
impl Target for PubSubTarget {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    async fn deliver(&self, events: &[NormalizedEvent]) -> DeliveryResult<()> {
        // Message ids derive from the identity key so the broker can dedup
        // redelivered ranges.
        let messages: Vec<_> = events
            .iter()
            .map(|event| json!({ "id": event.identity(), "event": event }))
            .collect();
        let body = json!({
            "topic": self.topic,
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Target {
                target: "pubsub".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Target {
                target: "pubsub".into(),
                reason: format!("broker returned {status} for topic '{}'", self.topic),
            });
        }

        debug!(topic = %self.topic, count = events.len(), "Batch published");
        Ok(())
    }
}
