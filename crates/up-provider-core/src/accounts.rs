//! Ordered address-list helpers shared by the client bridge and the host connector.
//!
//! `Address::ZERO` is the canonical empty slot. Wire values that are `null`, `""` or not a valid
//! address are read as that slot, so every list handled here is already free of "invalid" entries.

use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::BridgeError;

/// How empty slots inside an account list are cleaned up before the list leaves the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyAddressPolicy {
    /// Cut the list at the first empty slot.
    #[default]
    Truncate,
    /// Keep every slot in place as `Address::ZERO` and drop only the trailing run of empty slots.
    Sentinel,
}

impl FromStr for EmptyAddressPolicy {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "sentinel" => Ok(Self::Sentinel),
            other => Err(BridgeError::Validation(format!(
                "unknown empty address policy: {other}"
            ))),
        }
    }
}

/// A list entry that may be a placeholder.
pub trait Slot {
    fn is_vacant(&self) -> bool;
}

impl Slot for Address {
    fn is_vacant(&self) -> bool {
        *self == Address::ZERO
    }
}

impl Slot for String {
    fn is_vacant(&self) -> bool {
        self.trim().is_empty()
    }
}

/// True when the two lists differ at any index up to the longer length.
///
/// Vacant entries and missing entries compare equal to each other.
pub fn lists_differ<T: Slot + PartialEq>(a: &[T], b: &[T]) -> bool {
    let len = a.len().max(b.len());
    (0..len).any(|i| {
        let left = a.get(i).filter(|x| !x.is_vacant());
        let right = b.get(i).filter(|x| !x.is_vacant());
        left != right
    })
}

pub fn normalize(list: &[Address], policy: EmptyAddressPolicy) -> Vec<Address> {
    match policy {
        EmptyAddressPolicy::Truncate => list
            .iter()
            .take_while(|a| !a.is_vacant())
            .copied()
            .collect(),
        EmptyAddressPolicy::Sentinel => {
            let mut out = list.to_vec();
            while out.last().is_some_and(Slot::is_vacant) {
                out.pop();
            }
            out
        }
    }
}

pub fn parse_address(raw: &str) -> Address {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Address::ZERO;
    }
    trimmed.parse().unwrap_or(Address::ZERO)
}

/// Reads a JSON account list. Anything that is not an array yields an empty list.
pub fn parse_accounts(value: &Value) -> Vec<Address> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| item.as_str().map(parse_address).unwrap_or(Address::ZERO))
        .collect()
}

pub fn accounts_to_value(accounts: &[Address]) -> Value {
    Value::Array(
        accounts
            .iter()
            .map(|a| Value::String(a.to_string()))
            .collect(),
    )
}

pub fn serialize_accounts<S>(accounts: &[Address], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    accounts_to_value(accounts).serialize(serializer)
}

pub fn deserialize_accounts<'de, D>(deserializer: D) -> Result<Vec<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().map(parse_accounts).unwrap_or_default())
}
