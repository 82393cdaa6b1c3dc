//! Shared HTTP/JSON-RPC client used by all chain adapters.
//!
//! One reqwest client is reused across jobs for connection pooling; every
//! call carries its own timeout so a stalled endpoint fails fast instead of
//! starving other jobs' ticks.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::trace;

use watchtower_core::error::ChainError;

/// Configuration for the shared RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Endpoint URL (JSON-RPC POST target or REST base).
    pub url: String,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl RpcClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a single RPC call, before domain classification.
///
/// Adapters inspect [`RpcCallError::Rpc`] codes (e.g. Solana's skipped-slot
/// errors) before converting into a [`ChainError`].
#[derive(Debug)]
pub enum RpcCallError {
    /// Network-level failure: timeout, connect error, broken transport.
    Transport(String),
    /// The endpoint answered with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The response body did not have the expected shape.
    Decode(String),
}

impl From<RpcCallError> for ChainError {
    fn from(err: RpcCallError) -> Self {
        match err {
            RpcCallError::Transport(msg) => ChainError::Transient(msg),
            RpcCallError::Rpc { code, message } => {
                ChainError::Rpc(format!("code {code}: {message}"))
            }
            RpcCallError::Decode(msg) => ChainError::InvalidResponse(msg),
        }
    }
}

/// Thin JSON-RPC 2.0 / REST client over reqwest.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    config: RpcClientConfig,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Issue a JSON-RPC 2.0 call and decode the `result` field.
    pub async fn call<T, P>(&self, method: &str, params: P) -> Result<T, RpcCallError>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        trace!(method, url = %self.config.url, "RPC call");

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcCallError::Decode(e.to_string()))?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(RpcCallError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        let result = envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RpcCallError::Decode(format!("{method}: missing result field")))?;

        serde_json::from_value(result)
            .map_err(|e| RpcCallError::Decode(format!("{method}: {e}")))
    }

    /// Issue a REST GET against `{base}{path}` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RpcCallError> {
        let url = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        trace!(url = %url, "REST call");

        let response = self
            .http
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcCallError::Rpc {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| RpcCallError::Decode(e.to_string()))
    }
}

fn classify_transport(err: reqwest::Error) -> RpcCallError {
    // Timeouts and connection refusals are worth retrying; anything else
    // still goes through the transient path - the retry budget bounds it.
    RpcCallError::Transport(err.to_string())
}

/// Parse a `0x`-prefixed hex quantity into a u64.
pub(crate) fn parse_hex_u64(value: &str) -> Result<u64, RpcCallError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| RpcCallError::Decode(format!("bad hex quantity '{value}': {e}")))
}
