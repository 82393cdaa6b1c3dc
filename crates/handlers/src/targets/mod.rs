//! Delivery targets.

mod pubsub;
mod sink;

pub use pubsub::PubSubTarget;
pub use sink::SinkTarget;

use watchtower_core::models::TargetKind;
use watchtower_core::ports::Target;

/// Instantiate the target for a declared kind.
pub fn build_target(kind: &TargetKind) -> Box<dyn Target> {
    match kind {
        TargetKind::PubSub { endpoint, topic } => {
            Box::new(PubSubTarget::new(endpoint.clone(), topic.clone()))
        }
        TargetKind::Sink => Box::new(SinkTarget),
    }
}
