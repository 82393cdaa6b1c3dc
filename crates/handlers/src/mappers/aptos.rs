//! Aptos mapper: core-bridge `WormholeMessage` Move events.

use serde_json::{json, Value};

use watchtower_core::error::{MappingError, MappingResult};
use watchtower_core::models::{NormalizedEvent, RawChainRecord};
use watchtower_core::ports::Mapper;

/// Move event type suffix emitted by the core bridge module.
const MESSAGE_EVENT_SUFFIX: &str = "::state::WormholeMessage";

/// Maps core-bridge Move events to `log-message-published`.
pub struct AptosEventMapper;

impl Mapper for AptosEventMapper {
    fn name(&self) -> &'static str {
        "aptos-event"
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

            // The emitting module address prefixes the event type.
            let address = type_name
                .split("::")
                .next()
                .filter(|a| !a.is_empty())
                .ok_or(MappingError::Malformed {
                    tx_hash: record.tx_hash.clone(),
                    reason: format!("event type without module address: '{type_name}'"),
                })?
                .to_lowercase();

            let data = event.get("data").ok_or(MappingError::MissingField {
                field: "data",
                tx_hash: record.tx_hash.clone(),
            })?;

            let mut attributes = serde_json::Map::new();
            copy_field(data, "sender", &mut attributes);
            copy_field(data, "sequence", &mut attributes);
            copy_field(data, "nonce", &mut attributes);
            copy_field(data, "payload", &mut attributes);
            if let Some(level) = data.get("consistency_level") {
                attributes.insert("consistencyLevel".into(), level.clone());
            }

            events.push(NormalizedEvent {
                name: "log-message-published".into(),
                chain_id: record.chain_id,
                address,
                tx_hash: record.tx_hash.clone(),
                block_height: record.block_height,
                block_time: record.block_time,
                attributes,
            });
        }
        Ok(events)
    }
}

fn copy_field(data: &Value, field: &str, attributes: &mut serde_json::Map<String, Value>) {
    if let Some(value) = data.get(field) {
        attributes.insert(field.to_string(), value.clone());
    }
}
