use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::accounts::{deserialize_accounts, serialize_accounts};
use crate::wire::RpcErrorObject;
use crate::BridgeError;

/// The wallet behind the host connector.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject>;

    /// Source of upstream `accountsChanged` pushes, if the provider has one.
    fn accounts_changed(&self) -> Option<broadcast::Receiver<Vec<Address>>>;
}

/// Client state kept across sessions to warm-start the bridge before a handshake completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_accounts",
        deserialize_with = "deserialize_optional_accounts"
    )]
    pub allowed_accounts: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_urls: Option<Vec<String>>,
}

fn serialize_optional_accounts<S>(
    accounts: &Option<Vec<Address>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match accounts {
        Some(list) => serialize_accounts(list, serializer),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_accounts<'de, D>(deserializer: D) -> Result<Option<Vec<Address>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_accounts(deserializer).map(Some)
}

/// Best-effort key-value persistence. Callers ignore failures.
pub trait StateStore: Send + Sync {
    fn get(&self) -> Result<Option<PersistedState>, BridgeError>;
    fn set(&self, value: &PersistedState) -> Result<(), BridgeError>;
}
