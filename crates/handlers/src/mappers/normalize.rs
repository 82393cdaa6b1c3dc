//! Canonical forms for chain-native identifiers.
//!
//! Downstream consumers compare addresses and emitters as opaque strings,
//! so every mapper must emit the same spelling for the same on-chain
//! entity regardless of how the RPC happened to render it.

/// Canonical hex form: lowercase with a `0x` prefix.
pub fn normalize_hex(value: &str) -> String {
    let lower = value.to_lowercase();
    if let Some(stripped) = lower.strip_prefix("0x") {
        format!("0x{stripped}")
    } else {
        format!("0x{lower}")
    }
}

/// Canonical emitter form: 32 bytes of lowercase hex, zero-padded on the
/// left, with a `0x` prefix. EVM 20-byte addresses pad to this width.
pub fn normalize_emitter(value: &str) -> String {
    let lower = value.to_lowercase();
    let stripped = lower.strip_prefix("0x").unwrap_or(&lower);
    format!("0x{stripped:0>64}")
}
