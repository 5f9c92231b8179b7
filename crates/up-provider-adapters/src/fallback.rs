//! Direct JSON-RPC calls against configured endpoints for read-only methods.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use up_provider_core::{BridgeError, RpcRequest, RpcResponse};

const READ_ONLY_METHODS: &[&str] = &[
    "eth_call",
    "eth_getBalance",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_blockNumber",
    "eth_getTransactionCount",
    "eth_getBlockByNumber",
    "eth_getTransactionReceipt",
];

const VALUE_OR_GAS_FIELDS: &[&str] = &[
    "value",
    "gas",
    "gasPrice",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
];

/// True when `method` may skip the host: a read-only kind whose params carry no value transfer or
/// gas pricing.
pub fn is_fallback_eligible(method: &str, params: &Value) -> bool {
    if !READ_ONLY_METHODS.contains(&method) {
        return false;
    }
    let carries_value = |item: &Value| {
        item.as_object()
            .is_some_and(|o| VALUE_OR_GAS_FIELDS.iter().any(|f| o.contains_key(*f)))
    };
    match params {
        Value::Array(items) => !items.iter().any(carries_value),
        other => !carries_value(other),
    }
}

#[derive(Debug)]
pub struct RpcFallback {
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcFallback {
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Transport(format!("failed to build rpc client: {e}")))?;
        Ok(Self {
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Tries each URL in order and returns the first success. Network failures, non-2xx statuses
    /// and JSON-RPC errors all move on to the next URL.
    pub async fn call(
        &self,
        urls: &[String],
        method: &str,
        params: &Value,
    ) -> Result<Value, BridgeError> {
        let mut errors = Vec::with_capacity(urls.len());
        for url in urls {
            match self.call_one(url, method, params).await {
                Ok(result) => {
                    debug!(url = %url, method, "served by rpc endpoint");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(url = %url, method, error = %e, "rpc endpoint failed");
                    errors.push(format!("{url}: {e}"));
                }
            }
        }
        Err(BridgeError::RpcFallbackExhausted { errors })
    }

    async fn call_one(&self, url: &str, method: &str, params: &Value) -> Result<Value, String> {
        if url.trim().is_empty() {
            return Err("No RPC URL found".to_owned());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = RpcRequest::new(json!(id), method, params.clone());
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }
        let reply: RpcResponse = response
            .json()
            .await
            .map_err(|e| format!("json decode failed: {e}"))?;
        reply.into_outcome().map_err(|e| format!("returned error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_bearing_calls_stay_on_the_channel() {
        assert!(is_fallback_eligible(
            "eth_call",
            &json!([{ "to": "0x01", "data": "0x" }, "latest"])
        ));
        assert!(!is_fallback_eligible(
            "eth_call",
            &json!([{ "to": "0x01", "value": "0x1" }, "latest"])
        ));
        assert!(!is_fallback_eligible("eth_sendTransaction", &json!([{}])));
        assert!(is_fallback_eligible("eth_blockNumber", &Value::Null));
    }
}
