use serde_json::Value;
use thiserror::Error;

/// Every failure the bridge surfaces to a caller.
///
/// `Clone` so that a single failed discovery can be handed to every request that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("no host found: {0}")]
    DiscoveryFailure(String),
    #[error("transport closed: {0}")]
    TransportClosed(String),
    #[error("upstream error {code}: {message} {method}({params})")]
    Upstream {
        code: i64,
        message: String,
        method: String,
        params: Value,
    },
    #[error("all RPC URLs failed: {}", .errors.join(", "))]
    RpcFallbackExhausted { errors: Vec<String> },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    pub fn is_discovery_failure(&self) -> bool {
        matches!(self, Self::DiscoveryFailure(_))
    }

    pub fn is_transport_closed(&self) -> bool {
        matches!(self, Self::TransportClosed(_))
    }
}
