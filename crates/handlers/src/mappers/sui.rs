//! Sui mapper: `WormholeMessage` Move events.

use serde_json::{json, Value};

use watchtower_core::error::{MappingError, MappingResult};
use watchtower_core::models::{NormalizedEvent, RawChainRecord};
use watchtower_core::ports::Mapper;

/// Move event type suffix emitted by the core bridge package.
const MESSAGE_EVENT_SUFFIX: &str = "::publish_message::WormholeMessage";

/// Maps core-bridge Move events to `log-message-published`.
pub struct SuiEventMapper;

impl Mapper for SuiEventMapper {
    fn name(&self) -> &'static str {
        "sui-event"
    }

    fn map(&self, record: &RawChainRecord) -> MappingResult<Vec<NormalizedEvent>> {
        let events_json = record
            .payload
            .get("events")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();

        let mut events = Vec::new();
        for event in events_json {
            let type_name = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
            if !type_name.ends_with(MESSAGE_EVENT_SUFFIX) {
                continue;
            }

            let package = event
                .get("packageId")
                .and_then(|p| p.as_str())
                .ok_or(MappingError::MissingField {
                    field: "packageId",
                    tx_hash: record.tx_hash.clone(),
                })?;
            let parsed = event
                .get("parsedJson")
                .ok_or(MappingError::MissingField {
                    field: "parsedJson",
                    tx_hash: record.tx_hash.clone(),
                })?;

            let mut attributes = serde_json::Map::new();
            copy_field(parsed, "sender", &mut attributes);
            copy_field(parsed, "sequence", &mut attributes);
            copy_field(parsed, "nonce", &mut attributes);
            copy_field(parsed, "payload", &mut attributes);
            if let Some(level) = parsed.get("consistency_level") {
                attributes.insert("consistencyLevel".into(), level.clone());
            }

            events.push(NormalizedEvent {
                name: "log-message-published".into(),
                chain_id: record.chain_id,
                address: package.to_lowercase(),
                tx_hash: record.tx_hash.clone(),
                block_height: record.block_height,
                block_time: record.block_time,
                attributes,
            });
        }
        Ok(events)
    }
}

fn copy_field(parsed: &Value, field: &str, attributes: &mut serde_json::Map<String, Value>) {
    if let Some(value) = parsed.get(field) {
        attributes.insert(field.to_string(), value.clone());
    }
}
