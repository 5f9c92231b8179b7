//! The embedded side of the bridge.
//!
//! [`ClientBridge`] looks like an ordinary request-capable provider. The first request (or
//! construction, when eager) starts discovery; concurrent callers share the same attempt. Once a
//! host acknowledges, a reader task demultiplexes state pushes and responses off the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use alloy::primitives::Address;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use up_provider_core::wire::handshake_ack_message;
use up_provider_core::{
    accounts_to_value, classify, discovery_transition, format_chain_id, lists_differ, normalize,
    request_key, BridgeError, ClientEvent, DiscoveryAction, DiscoveryState, Incoming,
    Notification, PersistedState, RequestTable, RpcRequest, RpcResponse, StateStore,
};

use crate::config::BridgeConfig;
use crate::discovery::{find_host, DiscoveryTarget, Handshake, Mailbox};
use crate::events::{EventQueue, ListenerId};
use crate::fallback::{is_fallback_eligible, RpcFallback};
use crate::transport::{ContextRef, ExecutionContext, PortReceiver, PortSender};

type SharedDiscovery = Shared<BoxFuture<'static, Result<(), BridgeError>>>;

/// Method plus params, accepted either as a pair or as a request envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl From<&str> for RpcCall {
    fn from(method: &str) -> Self {
        Self::new(method, json!([]))
    }
}

impl From<(&str, Value)> for RpcCall {
    fn from((method, params): (&str, Value)) -> Self {
        Self::new(method, params)
    }
}

impl From<RpcRequest> for RpcCall {
    fn from(request: RpcRequest) -> Self {
        Self::new(request.method, request.params)
    }
}

struct Connection {
    sender: PortSender,
    reader: JoinHandle<()>,
    host: ContextRef,
    generation: u64,
}

struct ClientState {
    discovery: DiscoveryState,
    chain_id: u64,
    accounts: Vec<Address>,
    context_accounts: Vec<Address>,
    rpc_urls: Vec<String>,
    announced_connect: bool,
    connection: Option<Connection>,
    search: Option<SharedDiscovery>,
    generation: u64,
}

struct ClientInner {
    config: BridgeConfig,
    me: ContextRef,
    inbox: tokio::sync::Mutex<Mailbox>,
    target: DiscoveryTarget,
    state: Mutex<ClientState>,
    pending: RequestTable,
    events: EventQueue<ClientEvent>,
    fallback: RpcFallback,
    store: Option<Arc<dyn StateStore>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct ClientBridge {
    inner: Arc<ClientInner>,
}

impl ClientBridge {
    pub fn new(
        config: BridgeConfig,
        context: ExecutionContext,
        target: DiscoveryTarget,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self, BridgeError> {
        let (me, inbox) = context.into_parts();
        let mut state = ClientState {
            discovery: DiscoveryState::Idle,
            chain_id: 0,
            accounts: Vec::new(),
            context_accounts: Vec::new(),
            rpc_urls: Vec::new(),
            announced_connect: false,
            connection: None,
            search: None,
            generation: 0,
        };

        if let Some(store) = &store {
            match store.get() {
                Ok(Some(saved)) => {
                    debug!(context = me.name(), "warm start from state store");
                    if let Some(chain_id) = saved.chain_id {
                        state.chain_id = chain_id;
                    }
                    if let Some(accounts) = saved.allowed_accounts {
                        state.accounts = normalize(&accounts, config.empty_address_policy);
                    }
                    if let Some(urls) = saved.rpc_urls {
                        state.rpc_urls = urls;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "ignoring state store read failure"),
            }
        }

        let bridge = Self {
            inner: Arc::new(ClientInner {
                fallback: RpcFallback::new(config.rpc_timeout())?,
                events: EventQueue::new(config.resume_delay()),
                config,
                me,
                inbox: tokio::sync::Mutex::new(inbox),
                target,
                state: Mutex::new(state),
                pending: RequestTable::default(),
                store,
                next_id: AtomicU64::new(1),
            }),
        };

        if bridge.inner.config.eager_discovery {
            if tokio::runtime::Handle::try_current().is_ok() {
                let _ = bridge.discovery()?;
            } else {
                warn!("eager discovery requested outside a runtime; deferring to first request");
            }
        }
        Ok(bridge)
    }

    /// Issues a request. Waits for discovery first, starting it if needed.
    pub async fn request(&self, call: impl Into<RpcCall>) -> Result<Value, BridgeError> {
        let RpcCall { method, params } = call.into();
        let sender = self.ensure_connected().await?;

        match method.as_str() {
            "eth_chainId" => {
                let chain_id = self.inner.lock_state()?.chain_id;
                return Ok(json!(format_chain_id(chain_id)));
            }
            "eth_accounts" => return self.cached_accounts(),
            _ => {}
        }

        if is_fallback_eligible(&method, &params) {
            let urls = self.inner.lock_state()?.rpc_urls.clone();
            if !urls.is_empty() {
                debug!(method = %method, endpoints = urls.len(), "using direct rpc");
                return self.inner.fallback.call(&urls, &method, &params).await;
            }
        }

        // Accounts granted here reach the cache through the host's accountsChanged push.
        self.forward(&sender, &method, params).await
    }

    fn cached_accounts(&self) -> Result<Value, BridgeError> {
        let (accounts, connect) = {
            let mut g = self.inner.lock_state()?;
            let connect = if !g.accounts.is_empty() && !g.announced_connect {
                g.announced_connect = true;
                Some(g.chain_id)
            } else {
                None
            };
            (g.accounts.clone(), connect)
        };
        if let Some(chain_id) = connect {
            self.inner.events.emit(ClientEvent::Connect { chain_id });
        }
        Ok(accounts_to_value(&accounts))
    }

    async fn forward(
        &self,
        sender: &PortSender,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let id = json!(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let key = request_key(&id);
        let completion = self.inner.pending.register(&key, method, params.clone())?;
        let message = serde_json::to_value(RpcRequest::new(id, method, params))
            .map_err(|e| BridgeError::Transport(format!("failed to encode request: {e}")))?;

        if let Err(e) = sender.post(message) {
            self.inner.pending.take(&key)?;
            return Err(e);
        }
        self.inner.pending.mark_sent(&key)?;
        debug!(id = %key, method, "request forwarded");

        completion.await.map_err(|_| {
            BridgeError::TransportClosed(format!("request {key} abandoned before completion"))
        })?
    }

    async fn ensure_connected(&self) -> Result<PortSender, BridgeError> {
        if let Some(conn) = &self.inner.lock_state()?.connection {
            return Ok(conn.sender.clone());
        }
        self.discovery()?.await?;
        let g = self.inner.lock_state()?;
        g.connection
            .as_ref()
            .map(|c| c.sender.clone())
            .ok_or_else(|| {
                BridgeError::TransportClosed("channel closed after discovery".to_owned())
            })
    }

    /// The in-flight (or settled) discovery attempt, started if there is none.
    fn discovery(&self) -> Result<SharedDiscovery, BridgeError> {
        let mut g = self.inner.lock_state()?;
        if let Some(search) = &g.search {
            return Ok(search.clone());
        }
        let task_inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { task_inner.discover().await });
        let search = async move {
            task.await.map_err(|e| {
                BridgeError::DiscoveryFailure(format!("discovery task failed: {e}"))
            })?
        }
        .boxed()
        .shared();
        g.search = Some(search.clone());
        Ok(search)
    }

    /// Forgets a failed discovery so that the next request probes again.
    pub fn reset_discovery(&self) -> Result<(), BridgeError> {
        let mut g = self.inner.lock_state()?;
        if g.connection.is_none() {
            g.search = None;
        }
        Ok(())
    }

    /// Drops the channel to the host. Outstanding requests are rejected.
    pub fn close(&self) -> Result<(), BridgeError> {
        let conn = self.inner.lock_state()?.connection.take();
        match conn {
            Some(conn) => {
                conn.reader.abort();
                self.inner.teardown(conn.generation, "closed locally")
            }
            None => Ok(()),
        }
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.inner
            .lock_state()
            .map(|g| g.accounts.clone())
            .unwrap_or_default()
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.lock_state().map(|g| g.chain_id).unwrap_or(0)
    }

    pub fn context_accounts(&self) -> Vec<Address> {
        self.inner
            .lock_state()
            .map(|g| g.context_accounts.clone())
            .unwrap_or_default()
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.inner
            .lock_state()
            .map(|g| g.rpc_urls.clone())
            .unwrap_or_default()
    }

    /// True iff the cached allowed-accounts list is non-empty.
    pub fn is_connected(&self) -> bool {
        !self.accounts().is_empty()
    }

    pub fn has_channel(&self) -> bool {
        self.inner
            .lock_state()
            .map(|g| g.connection.is_some())
            .unwrap_or(false)
    }

    pub fn host(&self) -> Option<ContextRef> {
        self.inner
            .lock_state()
            .ok()
            .and_then(|g| g.connection.as_ref().map(|c| c.host.clone()))
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.inner
            .lock_state()
            .map(|g| g.discovery)
            .unwrap_or(DiscoveryState::Idle)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn context(&self) -> ContextRef {
        self.inner.me.clone()
    }

    /// The first listener triggers replay of buffered events after the resume delay.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn resume(&self, delay: std::time::Duration) {
        self.inner.events.resume(delay);
    }
}

impl std::fmt::Debug for ClientBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBridge")
            .field("context", &self.inner.me.name())
            .field("discovery", &self.discovery_state())
            .finish()
    }
}

impl ClientInner {
    fn lock_state(&self) -> Result<MutexGuard<'_, ClientState>, BridgeError> {
        self.state
            .lock()
            .map_err(|e| BridgeError::Transport(format!("client state lock poisoned: {e}")))
    }

    fn observe(&self, action: DiscoveryAction) {
        let Ok(mut g) = self.lock_state() else {
            return;
        };
        match discovery_transition(g.discovery, action) {
            Ok((next, transition)) => {
                debug!(
                    from = ?transition.from,
                    to = ?transition.to,
                    reason = transition.reason,
                    "discovery"
                );
                g.discovery = next;
            }
            Err(e) => warn!(error = %e, "discovery state out of step"),
        }
    }

    async fn discover(self: Arc<Self>) -> Result<(), BridgeError> {
        let handshake = {
            let mut inbox = self.inbox.lock().await;
            find_host(&self.config, &self.me, &mut inbox, &self.target, |action| {
                self.observe(action)
            })
            .await
        };
        match handshake {
            Ok(handshake) => self.adopt(handshake),
            Err(e) => {
                warn!(context = self.me.name(), error = %e, "discovery failed");
                Err(e)
            }
        }
    }

    fn adopt(self: &Arc<Self>, handshake: Handshake) -> Result<(), BridgeError> {
        let Handshake {
            host,
            snapshot,
            port,
            substituted,
        } = handshake;
        let policy = self.config.empty_address_policy;
        let accounts = normalize(&snapshot.allowed_accounts, policy);
        let context_accounts = normalize(&snapshot.context_accounts, policy);

        let (sender, receiver) = port.split();
        let mut events = Vec::new();
        {
            let mut g = self.lock_state()?;
            if g.chain_id != snapshot.chain_id {
                g.chain_id = snapshot.chain_id;
                events.push(ClientEvent::ChainChanged(snapshot.chain_id));
            }
            if lists_differ(&g.accounts, &accounts) {
                g.accounts = accounts;
                if g.accounts.is_empty() {
                    g.announced_connect = false;
                }
                events.push(ClientEvent::AccountsChanged(g.accounts.clone()));
            }
            if lists_differ(&g.context_accounts, &context_accounts) {
                g.context_accounts = context_accounts;
                events.push(ClientEvent::ContextAccountsChanged(g.context_accounts.clone()));
            }
            if lists_differ(&g.rpc_urls, &snapshot.rpc_urls) {
                g.rpc_urls = snapshot.rpc_urls.clone();
                events.push(ClientEvent::RpcUrlsChanged(g.rpc_urls.clone()));
            }

            let ack = handshake_ack_message(&snapshot);
            sender.post(ack)?;

            g.generation += 1;
            let generation = g.generation;
            let reader = spawn_reader(Arc::downgrade(self), receiver, generation);
            g.connection = Some(Connection {
                sender,
                reader,
                host: host.clone(),
                generation,
            });
        }

        info!(context = self.me.name(), host = host.name(), substituted, "channel established");
        self.persist();
        for event in events {
            self.events.emit(event);
        }
        Ok(())
    }

    fn handle_message(&self, message: Value) {
        match classify(&message) {
            Ok(Incoming::Notification(notification)) => self.apply(notification),
            Ok(Incoming::Response(response)) => self.complete(response),
            Ok(Incoming::Handshake(_)) => debug!("ignoring repeated handshake"),
            Ok(other) => debug!(?other, "ignoring unexpected message"),
            Err(e) => warn!(error = %e, "dropping malformed message"),
        }
    }

    fn apply(&self, notification: Notification) {
        let policy = self.config.empty_address_policy;
        let event = {
            let Ok(mut g) = self.lock_state() else {
                return;
            };
            match notification {
                Notification::ChainChanged(chain_id) => {
                    g.chain_id = chain_id;
                    ClientEvent::ChainChanged(chain_id)
                }
                Notification::AccountsChanged(accounts) => {
                    g.accounts = normalize(&accounts, policy);
                    if g.accounts.is_empty() {
                        g.announced_connect = false;
                    }
                    ClientEvent::AccountsChanged(g.accounts.clone())
                }
                Notification::ContextAccountsChanged(accounts) => {
                    g.context_accounts = normalize(&accounts, policy);
                    ClientEvent::ContextAccountsChanged(g.context_accounts.clone())
                }
                Notification::RpcUrlsChanged(urls) => {
                    g.rpc_urls = urls;
                    ClientEvent::RpcUrlsChanged(g.rpc_urls.clone())
                }
                Notification::Connect { chain_id } => {
                    g.announced_connect = true;
                    ClientEvent::Connect { chain_id }
                }
                Notification::Disconnect => {
                    g.announced_connect = false;
                    ClientEvent::Disconnect
                }
            }
        };
        debug!(?event, "host push");
        self.persist();
        self.events.emit(event);
    }

    fn complete(&self, response: RpcResponse) {
        let key = request_key(&response.id);
        let item = match self.pending.take(&key) {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(id = %key, "response for unknown request id");
                return;
            }
            Err(e) => {
                warn!(error = %e, "request table unavailable");
                return;
            }
        };
        match response.into_outcome() {
            Ok(result) => item.resolve(result),
            Err(error) => {
                warn!(
                    id = %key,
                    method = %item.method,
                    code = error.code,
                    message = %error.message,
                    "upstream error"
                );
                let annotated = BridgeError::Upstream {
                    code: error.code,
                    message: error.message,
                    method: item.method.clone(),
                    params: item.params.clone(),
                };
                item.reject(annotated);
            }
        }
    }

    /// Clears the connection for `generation`, rejects outstanding requests and emits `Closed`.
    fn teardown(&self, generation: u64, reason: &str) -> Result<(), BridgeError> {
        {
            let mut g = self.lock_state()?;
            if g.generation != generation {
                return Ok(());
            }
            if g.connection.as_ref().is_some_and(|c| c.generation == generation) {
                g.connection = None;
            }
            g.search = None;
            match discovery_transition(g.discovery, DiscoveryAction::TransportClosed) {
                Ok((next, _)) => g.discovery = next,
                Err(e) => debug!(error = %e, "teardown outside connected state"),
            }
        }
        let rejected = self
            .pending
            .reject_all(&BridgeError::TransportClosed(format!("channel to host {reason}")))?;
        info!(context = self.me.name(), rejected, reason, "channel closed");
        self.events.emit(ClientEvent::Closed);
        Ok(())
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let value = match self.lock_state() {
            Ok(g) => PersistedState {
                chain_id: Some(g.chain_id),
                allowed_accounts: Some(g.accounts.clone()),
                rpc_urls: Some(g.rpc_urls.clone()),
            },
            Err(_) => return,
        };
        if let Err(e) = store.set(&value) {
            debug!(error = %e, "ignoring state store write failure");
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Ok(g) = self.state.lock() {
            if let Some(conn) = &g.connection {
                conn.reader.abort();
            }
        }
    }
}

fn spawn_reader(
    inner: Weak<ClientInner>,
    mut receiver: PortReceiver,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.handle_message(message);
        }
        if let Some(inner) = inner.upgrade() {
            if let Err(e) = inner.teardown(generation, "closed by host") {
                warn!(error = %e, "channel teardown failed");
            }
        }
    })
}
