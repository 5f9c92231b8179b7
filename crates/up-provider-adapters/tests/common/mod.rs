#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use up_provider_adapters::{
    BridgeConfig, ClientBridge, ConnectorConfig, DiscoveryTarget, ExecutionContext, HostConnector,
};
use up_provider_core::{
    accounts_to_value, format_chain_id, BridgeError, RpcErrorObject, StateStore, UpstreamProvider,
};

pub fn address(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// Wallet stand-in: answers `eth_chainId`/`eth_accounts` from its own state, scripted responses
/// for anything else, and "not supported" otherwise.
pub struct ScriptedUpstream {
    chain_id: u64,
    accounts: Mutex<Vec<Address>>,
    responses: Mutex<HashMap<String, Result<Value, RpcErrorObject>>>,
    hanging: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
    accounts_tx: broadcast::Sender<Vec<Address>>,
}

impl ScriptedUpstream {
    pub fn new(chain_id: u64, accounts: Vec<Address>) -> Arc<Self> {
        let (accounts_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            chain_id,
            accounts: Mutex::new(accounts),
            responses: Mutex::new(HashMap::new()),
            hanging: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            accounts_tx,
        })
    }

    pub fn respond(&self, method: &str, outcome: Result<Value, RpcErrorObject>) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(method.to_owned(), outcome);
    }

    /// Requests for `method` never complete.
    pub fn hang(&self, method: &str) {
        self.hanging
            .lock()
            .expect("hanging lock")
            .insert(method.to_owned());
    }

    /// Requests for `method` answer only after `by`.
    pub fn delay(&self, method: &str, by: Duration) {
        self.delays
            .lock()
            .expect("delays lock")
            .insert(method.to_owned(), by);
    }

    pub fn push_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().expect("accounts lock") = accounts.clone();
        let _ = self.accounts_tx.send(accounts);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }
}

#[async_trait]
impl UpstreamProvider for ScriptedUpstream {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method.to_owned(), params));
        let hang = self.hanging.lock().expect("hanging lock").contains(method);
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = self.delays.lock().expect("delays lock").get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match method {
            "eth_chainId" => Ok(json!(format_chain_id(self.chain_id))),
            "eth_accounts" => Ok(accounts_to_value(&self.accounts.lock().expect("accounts lock"))),
            _ => self
                .responses
                .lock()
                .expect("responses lock")
                .get(method)
                .cloned()
                .unwrap_or_else(|| {
                    Err(RpcErrorObject::new(
                        4200,
                        format!("method {method} not supported."),
                    ))
                }),
        }
    }

    fn accounts_changed(&self) -> Option<broadcast::Receiver<Vec<Address>>> {
        Some(self.accounts_tx.subscribe())
    }
}

/// Shared sink for events delivered to a listener.
pub struct Recorder<E> {
    seen: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |event: &E| seen.lock().expect("recorder lock").push(event.clone())
    }

    pub fn events(&self) -> Vec<E> {
        self.seen.lock().expect("recorder lock").clone()
    }

    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.seen.lock().expect("recorder lock"))
    }
}

pub struct Harness {
    pub connector: HostConnector,
    pub upstream: Arc<ScriptedUpstream>,
}

pub async fn host(chain_id: u64, accounts: Vec<Address>) -> Harness {
    host_with_urls(chain_id, accounts, Vec::new()).await
}

pub async fn host_with_urls(chain_id: u64, accounts: Vec<Address>, rpc_urls: Vec<String>) -> Harness {
    let connector = HostConnector::new(ConnectorConfig::default(), ExecutionContext::new("host"))
        .expect("host connector");
    let upstream = ScriptedUpstream::new(chain_id, accounts);
    connector
        .setup_provider(upstream.clone(), rpc_urls)
        .await
        .expect("setup provider");
    Harness {
        connector,
        upstream,
    }
}

pub fn client_for(connector: &HostConnector, name: &str) -> ClientBridge {
    client_with(connector, name, BridgeConfig::default(), None)
}

pub fn client_with(
    connector: &HostConnector,
    name: &str,
    config: BridgeConfig,
    store: Option<Arc<dyn StateStore>>,
) -> ClientBridge {
    ClientBridge::new(
        config,
        ExecutionContext::new(name),
        DiscoveryTarget::explicit(connector.context()),
        store,
    )
    .expect("client bridge")
}

/// Config that fails fast against an explicit target.
pub fn no_search() -> BridgeConfig {
    BridgeConfig {
        search: false,
        ..BridgeConfig::default()
    }
}

/// Long enough for in-flight messages, pushes and the listener resume delay to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

pub fn accounts_of(value: &Value) -> Vec<Address> {
    up_provider_core::parse_accounts(value)
}

pub fn expect_discovery_failure(result: Result<Value, BridgeError>) -> BridgeError {
    let err = result.expect_err("request should fail");
    assert!(err.is_discovery_failure(), "unexpected error: {err}");
    err
}
