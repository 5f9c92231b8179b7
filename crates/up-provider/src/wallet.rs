use std::sync::Mutex;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::info;

use up_provider_core::{
    accounts_to_value, format_chain_id, parse_chain_id, RpcErrorObject, UpstreamProvider,
};

/// In-memory wallet standing in for the provider a real host would wrap.
pub struct DemoWallet {
    chain_id: Mutex<u64>,
    accounts: Mutex<Vec<Address>>,
    accounts_tx: broadcast::Sender<Vec<Address>>,
}

impl DemoWallet {
    pub fn new(chain_id: u64, accounts: Vec<Address>) -> Self {
        let (accounts_tx, _) = broadcast::channel(8);
        Self {
            chain_id: Mutex::new(chain_id),
            accounts: Mutex::new(accounts),
            accounts_tx,
        }
    }

    /// Simulates the user picking different accounts in the wallet UI.
    pub fn select_accounts(&self, accounts: Vec<Address>) {
        if let Ok(mut current) = self.accounts.lock() {
            *current = accounts.clone();
        }
        let _ = self.accounts_tx.send(accounts);
    }

    fn accounts(&self) -> Result<Vec<Address>, RpcErrorObject> {
        self.accounts
            .lock()
            .map(|a| a.clone())
            .map_err(|e| RpcErrorObject::internal(e.to_string()))
    }
}

#[async_trait]
impl UpstreamProvider for DemoWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
        match method {
            "eth_chainId" => {
                let chain_id = *self
                    .chain_id
                    .lock()
                    .map_err(|e| RpcErrorObject::internal(e.to_string()))?;
                Ok(json!(format_chain_id(chain_id)))
            }
            "eth_accounts" => Ok(accounts_to_value(&self.accounts()?)),
            "eth_getBalance" => Ok(json!("0xde0b6b3a7640000")),
            "eth_sendTransaction" => {
                info!(tx = %params, "wallet signing transaction");
                Ok(json!(format!("0x{}", "ab".repeat(32))))
            }
            "wallet_requestPermissions" => {
                let accounts = self.accounts()?;
                Ok(json!([{
                    "parentCapability": "eth_accounts",
                    "accounts": accounts_to_value(&accounts),
                }]))
            }
            "wallet_addEthereumChain" => {
                let requested = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .ok_or_else(|| RpcErrorObject::invalid_params("missing chainId"))?;
                let chain_id = parse_chain_id(requested)
                    .map_err(|e| RpcErrorObject::invalid_params(e.to_string()))?;
                *self
                    .chain_id
                    .lock()
                    .map_err(|e| RpcErrorObject::internal(e.to_string()))? = chain_id;
                Ok(Value::Null)
            }
            other => Err(RpcErrorObject::new(
                4200,
                format!("method {other} not supported."),
            )),
        }
    }

    fn accounts_changed(&self) -> Option<broadcast::Receiver<Vec<Address>>> {
        Some(self.accounts_tx.subscribe())
    }
}
