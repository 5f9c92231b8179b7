//! Wire shapes exchanged between client and host.
//!
//! Channel traffic is plain JSON: JSON-RPC 2.0 requests and responses, id-less notifications for
//! state pushes, and `type`-tagged handshake messages.

use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::accounts::{accounts_to_value, parse_accounts};
use crate::domain::Snapshot;
use crate::BridgeError;

pub const JSONRPC_VERSION: &str = "2.0";
/// Probe a candidate context sends to ask whether a host lives there.
pub const PROBE_MESSAGE: &str = "upProvider:hasProvider";
/// Host acknowledgment carrying the initial snapshot.
pub const HANDSHAKE_TYPE: &str = "upProvider:windowInitialize";
/// Client confirmation that the snapshot was adopted.
pub const HANDSHAKE_ACK_TYPE: &str = "upProvider:windowInitialized";

pub const CODE_USER_REJECTED: i64 = 4001;
pub const CODE_UNSUPPORTED_METHOD: i64 = 4200;
pub const CODE_DISCONNECTED: i64 = 4900;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INTERNAL: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(CODE_METHOD_NOT_FOUND, format!("method {method} not found"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, message)
    }
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn from_outcome(id: Value, outcome: Result<Value, RpcErrorObject>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result,
            error,
        }
    }

    /// A `null` result deserializes as `None`, so a response without an error is a success.
    pub fn into_outcome(self) -> Result<Value, RpcErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut message = json!({ "jsonrpc": self.jsonrpc, "id": self.id });
        match (&self.error, &self.result) {
            (Some(error), _) => message["error"] = json!(error),
            (None, result) => message["result"] = result.clone().unwrap_or(Value::Null),
        }
        message
    }
}

/// State pushes sent from host to client over an established channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ChainChanged(u64),
    AccountsChanged(Vec<Address>),
    ContextAccountsChanged(Vec<Address>),
    RpcUrlsChanged(Vec<String>),
    Connect { chain_id: u64 },
    Disconnect,
}

impl Notification {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ChainChanged(_) => "chainChanged",
            Self::AccountsChanged(_) => "accountsChanged",
            Self::ContextAccountsChanged(_) => "contextAccountsChanged",
            Self::RpcUrlsChanged(_) => "rpcUrlsChanged",
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            Self::ChainChanged(chain_id) => json!([chain_id]),
            Self::AccountsChanged(accounts) | Self::ContextAccountsChanged(accounts) => {
                accounts_to_value(accounts)
            }
            Self::RpcUrlsChanged(urls) => json!(urls),
            Self::Connect { chain_id } => json!([{ "chainId": format_chain_id(*chain_id) }]),
            Self::Disconnect => json!([]),
        }
    }

    pub fn to_message(&self) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": self.method(),
            "params": self.params(),
        })
    }

    /// Returns `Ok(None)` when `method` is not a state push.
    pub fn parse(method: &str, params: &Value) -> Result<Option<Self>, BridgeError> {
        let notification = match method {
            "chainChanged" => Self::ChainChanged(parse_chain_id(first_param(params))?),
            "accountsChanged" => Self::AccountsChanged(parse_accounts(params)),
            "contextAccountsChanged" => Self::ContextAccountsChanged(parse_accounts(params)),
            "rpcUrlsChanged" => Self::RpcUrlsChanged(
                params
                    .as_array()
                    .map(|urls| {
                        urls.iter()
                            .filter_map(|u| u.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            "connect" => {
                let chain_id = first_param(params)
                    .get("chainId")
                    .ok_or_else(|| {
                        BridgeError::MalformedMessage("connect without chainId".to_owned())
                    })
                    .and_then(parse_chain_id)?;
                Self::Connect { chain_id }
            }
            "disconnect" => Self::Disconnect,
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }
}

fn first_param(params: &Value) -> &Value {
    match params {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

/// Classified view of one message read from a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Handshake(Snapshot),
    HandshakeAck,
    Notification(Notification),
    Request(RpcRequest),
    Response(RpcResponse),
}

pub fn classify(message: &Value) -> Result<Incoming, BridgeError> {
    let Some(object) = message.as_object() else {
        return Err(BridgeError::MalformedMessage(format!(
            "expected JSON object, got {message}"
        )));
    };

    if let Some(kind) = object.get("type").and_then(Value::as_str) {
        return match kind {
            HANDSHAKE_TYPE => serde_json::from_value(message.clone())
                .map(Incoming::Handshake)
                .map_err(|e| BridgeError::MalformedMessage(format!("bad handshake: {e}"))),
            HANDSHAKE_ACK_TYPE => Ok(Incoming::HandshakeAck),
            other => Err(BridgeError::MalformedMessage(format!(
                "unknown message type {other}"
            ))),
        };
    }

    let has_id = object.get("id").is_some_and(|id| !id.is_null());

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let params = object.get("params").unwrap_or(&Value::Null);
        if !has_id {
            return Notification::parse(method, params)?
                .map(Incoming::Notification)
                .ok_or_else(|| {
                    BridgeError::MalformedMessage(format!("unknown notification {method}"))
                });
        }
        return serde_json::from_value(message.clone())
            .map(Incoming::Request)
            .map_err(|e| BridgeError::MalformedMessage(format!("bad request: {e}")));
    }

    if has_id && (object.contains_key("result") || object.contains_key("error")) {
        return serde_json::from_value(message.clone())
            .map(Incoming::Response)
            .map_err(|e| BridgeError::MalformedMessage(format!("bad response: {e}")));
    }

    Err(BridgeError::MalformedMessage(format!(
        "unrecognized message {message}"
    )))
}

pub fn handshake_message(snapshot: &Snapshot) -> Value {
    let mut message = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
    message["type"] = Value::String(HANDSHAKE_TYPE.to_owned());
    message
}

pub fn handshake_ack_message(snapshot: &Snapshot) -> Value {
    let mut message = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
    message["type"] = Value::String(HANDSHAKE_ACK_TYPE.to_owned());
    message
}

pub fn format_chain_id(chain_id: u64) -> String {
    format!("0x{chain_id:x}")
}

/// Accepts a JSON number, a `0x` hex string or a decimal string.
pub fn parse_chain_id(value: &Value) -> Result<u64, BridgeError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let raw = value.as_str().ok_or_else(|| {
        BridgeError::Validation(format!("chain id must be string or number: {value}"))
    })?;
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| BridgeError::Validation(format!("invalid hex chain id: {e}")))
    } else {
        raw.parse()
            .map_err(|e| BridgeError::Validation(format!("invalid chain id: {e}")))
    }
}

/// Table key for a JSON-RPC id; the JSON encoding keeps `1` and `"1"` distinct.
pub fn request_key(id: &Value) -> String {
    id.to_string()
}

pub fn namespace_id(channel_id: &str, id: &Value) -> String {
    format!("{channel_id}:{id}")
}

pub fn strip_namespace(channel_id: &str, namespaced: &str) -> Result<Value, BridgeError> {
    let raw = namespaced
        .strip_prefix(channel_id)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| {
            BridgeError::Validation(format!(
                "response id {namespaced} does not belong to channel {channel_id}"
            ))
        })?;
    serde_json::from_str(raw)
        .map_err(|e| BridgeError::Validation(format!("invalid namespaced id {namespaced}: {e}")))
}

/// Accounts granted by a `wallet_requestPermissions` result, read from its first permission.
pub fn permission_accounts(result: &Value) -> Option<Vec<Address>> {
    result.as_array()?.first()?.get("accounts").map(parse_accounts)
}

/// Matches upstream errors shaped like `method <name> not supported.`, which are handed to the
/// next handler instead of being returned to the client.
pub fn is_method_not_supported(message: &str) -> bool {
    let Some(start) = message.find("method ") else {
        return false;
    };
    let rest = &message[start + "method ".len()..];
    rest.find(" not supported")
        .map(|pos| rest[pos + " not supported".len()..].chars().next().is_some())
        .unwrap_or(false)
}
