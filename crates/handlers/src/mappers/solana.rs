//! Solana mapper: core-bridge message posts.
//!
//! Solana transactions carry no typed event log; the bridge's `postMessage`
//! instruction announces itself through the program's log lines. The
//! assigned sequence is only visible there, so the mapper parses it out of
//! `meta.logMessages`.

use serde_json::{json, Value};

use watchtower_core::error::{MappingError, MappingResult};
use watchtower_core::models::{NormalizedEvent, RawChainRecord};
use watchtower_core::ports::Mapper;

/// Core bridge program on mainnet-beta.
const CORE_BRIDGE_PROGRAM: &str = "worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth";

const SEQUENCE_LOG_PREFIX: &str = "Program log: Sequence: ";

/// Maps core-bridge message posts to `log-message-published`.
pub struct SolanaMessageMapper;

impl Mapper for SolanaMessageMapper {
    fn name(&self) -> &'static str {
        "solana-message"
    }

    fn map(&self, record: &RawChainRecord) -> MappingResult<Vec<NormalizedEvent>> {
        if !touches_program(&record.payload, CORE_BRIDGE_PROGRAM) {
            return Ok(Vec::new());
        }

        let logs = record
            .payload
            .pointer("/meta/logMessages")
            .and_then(|l| l.as_array());
        let Some(logs) = logs else {
            // The program was invoked but the node returned no logs.
            return Err(MappingError::MissingField {
                field: "meta.logMessages",
                tx_hash: record.tx_hash.clone(),
            });
        };

        let mut events = Vec::new();
        for line in logs.iter().filter_map(|l| l.as_str()) {
            let Some(raw_sequence) = line.strip_prefix(SEQUENCE_LOG_PREFIX) else {
                continue;
            };
            let sequence: u64 =
                raw_sequence
                    .trim()
                    .parse()
                    .map_err(|_| MappingError::Malformed {
                        tx_hash: record.tx_hash.clone(),
                        reason: format!("unparseable sequence log '{line}'"),
                    })?;

            let mut attributes = serde_json::Map::new();
            attributes.insert("sequence".into(), json!(sequence));
            attributes.insert("program".into(), json!(CORE_BRIDGE_PROGRAM));

            events.push(NormalizedEvent {
                name: "log-message-published".into(),
                chain_id: record.chain_id,
                address: CORE_BRIDGE_PROGRAM.to_string(),
                tx_hash: record.tx_hash.clone(),
                block_height: record.block_height,
                block_time: record.block_time,
                attributes,
            });
        }
        Ok(events)
    }
}

fn touches_program(payload: &Value, program: &str) -> bool {
    payload
        .pointer("/transaction/message/accountKeys")
        .and_then(|k| k.as_array())
        .map(|keys| keys.iter().filter_map(|k| k.as_str()).any(|k| k == program))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchtower_core::models::ChainId;

    fn record(logs: Value) -> RawChainRecord {
        RawChainRecord {
            chain_id: ChainId::SOLANA,
            tx_hash: "5sigAAA".into(),
            block_height: 250_000_000,
            block_time: None,
            index_in_block: 12,
            payload: json!({
                "transaction": {
                    "message": { "accountKeys": ["SenderKey", CORE_BRIDGE_PROGRAM] }
                },
                "meta": { "logMessages": logs }
            }),
        }
    }

    #[test]
    fn sequence_log_yields_a_message_event() {
        let events = SolanaMessageMapper
            .map(&record(json!([
                "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth invoke [1]",
                "Program log: Sequence: 901",
                "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth success",
            ])))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "log-message-published");
        assert_eq!(events[0].attributes["sequence"], json!(901));
        assert_eq!(events[0].address, CORE_BRIDGE_PROGRAM);
    }

    #[test]
    fn transaction_without_bridge_program_maps_to_nothing() {
        let mut rec = record(json!(["Program log: Sequence: 1"]));
        rec.payload["transaction"]["message"]["accountKeys"] = json!(["OtherProgram"]);
        assert!(SolanaMessageMapper.map(&rec).unwrap().is_empty());
    }

    #[test]
    fn garbage_sequence_is_malformed() {
        let err = SolanaMessageMapper
            .map(&record(json!(["Program log: Sequence: not-a-number"])))
            .unwrap_err();
        assert!(matches!(err, MappingError::Malformed { .. }));
    }
}
