use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accounts::{deserialize_accounts, serialize_accounts};
use crate::wire::RpcErrorObject;

/// Result of inspecting a candidate host context before probing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDomain {
    /// A dedicated channel endpoint can be handed over with the probe.
    SameDomain,
    /// Endpoints cannot be transferred; the host must substitute its own channel.
    CrossDomain,
    /// Transfer the endpoint but also accept a substituted one.
    Unknown,
}

/// State the host hands to a client when acknowledging a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub chain_id: u64,
    #[serde(
        default,
        alias = "accounts",
        serialize_with = "serialize_accounts",
        deserialize_with = "deserialize_accounts"
    )]
    pub allowed_accounts: Vec<Address>,
    #[serde(
        default,
        serialize_with = "serialize_accounts",
        deserialize_with = "deserialize_accounts"
    )]
    pub context_accounts: Vec<Address>,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

/// Events re-emitted by the embedded client bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ChainChanged(u64),
    AccountsChanged(Vec<Address>),
    ContextAccountsChanged(Vec<Address>),
    RpcUrlsChanged(Vec<String>),
    Connect { chain_id: u64 },
    Disconnect,
    /// The channel to the host is gone; the next request runs discovery again.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentTransaction {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

/// Events observed on one host-side client channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connect { chain_id: u64 },
    Disconnect,
    ChainChanged(u64),
    AccountsChanged(Vec<Address>),
    ContextAccountsChanged(Vec<Address>),
    RequestAccounts(Vec<Address>),
    SentTransaction(SentTransaction),
    Closed,
}
