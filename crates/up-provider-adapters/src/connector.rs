//! The hosting side of the bridge.
//!
//! A [`HostConnector`] owns the canonical chain id and account lists, answers discovery probes
//! arriving in its context mailbox, and keeps one [`ClientChannel`] per embedded context. State
//! changes fan out to every channel, each of which decides on its own whether a push is due.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use alloy::primitives::Address;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use up_provider_core::accounts::parse_address;
use up_provider_core::wire::handshake_message;
use up_provider_core::{
    accounts_to_value, classify, format_chain_id, lists_differ, namespace_id, normalize,
    parse_accounts, parse_chain_id, permission_accounts, strip_namespace, BridgeError,
    ChannelEvent, ChannelState, Incoming, RpcErrorObject, RpcRequest, RpcResponse,
    SentTransaction, UpstreamProvider,
};

use crate::channel::{ChannelSeed, ClientChannel, Staged};
use crate::config::ConnectorConfig;
use crate::dispatch::{run_chain, Outcome, RpcHandler, UpstreamForwarder};
use crate::events::{EventQueue, ListenerId};
use crate::transport::{ContextMessage, ContextRef, ExecutionContext, MessagePort, PortReceiver};

#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A client adopted its snapshot; host code may now configure the channel.
    ChannelCreated(Arc<ClientChannel>),
    ChannelClosed(String),
}

/// Ways host code can name a channel.
#[derive(Debug, Clone, Copy)]
pub enum ChannelLookup<'a> {
    Id(&'a str),
    Context(&'a ContextRef),
    Channel(&'a ClientChannel),
}

impl<'a> From<&'a str> for ChannelLookup<'a> {
    fn from(id: &'a str) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a ContextRef> for ChannelLookup<'a> {
    fn from(context: &'a ContextRef) -> Self {
        Self::Context(context)
    }
}

impl<'a> From<&'a ClientChannel> for ChannelLookup<'a> {
    fn from(channel: &'a ClientChannel) -> Self {
        Self::Channel(channel)
    }
}

impl<'a> From<&'a Arc<ClientChannel>> for ChannelLookup<'a> {
    fn from(channel: &'a Arc<ClientChannel>) -> Self {
        Self::Channel(channel.as_ref())
    }
}

#[derive(Default)]
struct Canonical {
    chain_id: u64,
    allowed_accounts: Vec<Address>,
    context_accounts: Vec<Address>,
    rpc_urls: Vec<String>,
    upstream: Option<Arc<dyn UpstreamProvider>>,
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    upstream_watch: Option<JoinHandle<()>>,
}

struct ConnectorInner {
    config: ConnectorConfig,
    me: ContextRef,
    canonical: Mutex<Canonical>,
    channels: Mutex<HashMap<String, Arc<ClientChannel>>>,
    /// Held across a canonical update and its fan-out so channels see updates in commit order.
    updates: Mutex<()>,
    events: EventQueue<ConnectorEvent>,
    handlers: Mutex<Vec<Arc<dyn RpcHandler>>>,
    setup: tokio::sync::Mutex<()>,
    tasks: Mutex<Tasks>,
}

#[derive(Clone)]
pub struct HostConnector {
    inner: Arc<ConnectorInner>,
}

impl HostConnector {
    /// Starts answering probes addressed to `context`. Must run inside a tokio runtime.
    pub fn new(config: ConnectorConfig, context: ExecutionContext) -> Result<Self, BridgeError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BridgeError::Transport(
                "host connector requires a tokio runtime".to_owned(),
            ));
        }
        let (me, inbox) = context.into_parts();
        let inner = Arc::new(ConnectorInner {
            events: EventQueue::new(config.resume_delay()),
            config,
            me,
            canonical: Mutex::new(Canonical::default()),
            channels: Mutex::new(HashMap::new()),
            updates: Mutex::new(()),
            handlers: Mutex::new(Vec::new()),
            setup: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Tasks::default()),
        });
        let listener = spawn_listener(Arc::downgrade(&inner), inbox);
        inner.lock_tasks()?.listener = Some(listener);
        info!(context = inner.me.name(), "host connector listening");
        Ok(Self { inner })
    }

    /// Handle clients use as their discovery target.
    pub fn context(&self) -> ContextRef {
        self.inner.me.clone()
    }

    /// Swaps the upstream provider, re-reads its chain id and accounts, and follows its
    /// `accountsChanged` pushes. Calls are serialized; requests wait for an in-flight setup.
    pub async fn setup_provider(
        &self,
        upstream: Arc<dyn UpstreamProvider>,
        rpc_urls: Vec<String>,
    ) -> Result<(), BridgeError> {
        let _setup = self.inner.setup.lock().await;

        if let Some(old) = self.inner.lock_tasks()?.upstream_watch.take() {
            debug!("detaching previous upstream accountsChanged subscription");
            old.abort();
        }
        self.inner.lock_canonical()?.upstream = Some(Arc::clone(&upstream));
        self.set_rpc_urls(&rpc_urls)?;

        match upstream.request("eth_chainId", json!([])).await {
            Ok(value) if !value.is_null() => match parse_chain_id(&value) {
                Ok(chain_id) => self.set_chain_id(chain_id)?,
                Err(e) => warn!(error = %e, "upstream returned an unreadable chain id"),
            },
            Ok(_) => {}
            Err(e) => warn!(error = %e, "upstream eth_chainId failed"),
        }

        match upstream.request("eth_accounts", json!([])).await {
            Ok(value) => self.set_allowed_accounts(&parse_accounts(&value))?,
            Err(e) => warn!(error = %e, "upstream eth_accounts failed"),
        }

        if let Some(mut updates) = upstream.accounts_changed() {
            let weak = Arc::downgrade(&self.inner);
            let watch = tokio::spawn(async move {
                loop {
                    match updates.recv().await {
                        Ok(accounts) => {
                            let Some(inner) = weak.upgrade() else {
                                return;
                            };
                            let connector = HostConnector { inner };
                            if let Err(e) = connector.set_allowed_accounts(&accounts) {
                                warn!(error = %e, "failed to apply upstream accountsChanged");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "upstream accountsChanged lagged");
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            });
            self.inner.lock_tasks()?.upstream_watch = Some(watch);
        }
        info!(chain_id = self.chain_id(), "upstream provider attached");
        Ok(())
    }

    pub fn set_allowed_accounts(&self, accounts: &[Address]) -> Result<(), BridgeError> {
        let next = normalize(accounts, self.inner.config.empty_address_policy);
        let changed = self.inner.update(
            "set_allowed_accounts",
            |c| {
                if !lists_differ(&c.allowed_accounts, &next) {
                    return false;
                }
                c.allowed_accounts = next.clone();
                true
            },
            |channel| channel.stage_allowed_accounts(&next),
        )?;
        if changed {
            info!(accounts = next.len(), "allowed accounts changed");
        }
        Ok(())
    }

    pub fn set_context_accounts(&self, accounts: &[Address]) -> Result<(), BridgeError> {
        let next = normalize(accounts, self.inner.config.empty_address_policy);
        self.inner.update(
            "set_context_accounts",
            |c| {
                if !lists_differ(&c.context_accounts, &next) {
                    return false;
                }
                c.context_accounts = next.clone();
                true
            },
            |channel| channel.stage_context_accounts(&next),
        )?;
        Ok(())
    }

    pub fn set_chain_id(&self, chain_id: u64) -> Result<(), BridgeError> {
        let changed = self.inner.update(
            "set_chain_id",
            |c| std::mem::replace(&mut c.chain_id, chain_id) != chain_id,
            |channel| channel.stage_chain_id(chain_id),
        )?;
        if changed {
            info!(chain_id, "chain changed");
        }
        Ok(())
    }

    pub fn set_rpc_urls(&self, urls: &[String]) -> Result<(), BridgeError> {
        self.inner.update(
            "set_rpc_urls",
            |c| {
                if !lists_differ(&c.rpc_urls, urls) {
                    return false;
                }
                c.rpc_urls = urls.to_vec();
                true
            },
            |channel| channel.stage_rpc_urls(urls),
        )?;
        Ok(())
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.lock_canonical().map(|c| c.chain_id).unwrap_or(0)
    }

    pub fn allowed_accounts(&self) -> Vec<Address> {
        self.inner
            .lock_canonical()
            .map(|c| c.allowed_accounts.clone())
            .unwrap_or_default()
    }

    pub fn context_accounts(&self) -> Vec<Address> {
        self.inner
            .lock_canonical()
            .map(|c| c.context_accounts.clone())
            .unwrap_or_default()
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.inner
            .lock_canonical()
            .map(|c| c.rpc_urls.clone())
            .unwrap_or_default()
    }

    pub fn channels(&self) -> Vec<Arc<ClientChannel>> {
        self.inner
            .lock_channels()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_channel<'a>(
        &self,
        lookup: impl Into<ChannelLookup<'a>>,
    ) -> Option<Arc<ClientChannel>> {
        let channels = self.inner.lock_channels().ok()?;
        match lookup.into() {
            ChannelLookup::Id(id) => channels.get(id).cloned(),
            ChannelLookup::Context(context) => channels
                .values()
                .find(|c| c.origin() == context)
                .cloned(),
            ChannelLookup::Channel(channel) => channels.get(channel.id()).cloned(),
        }
    }

    /// Appends a handler that runs after the upstream forwarder.
    pub fn add_handler(&self, handler: Arc<dyn RpcHandler>) -> Result<(), BridgeError> {
        self.inner
            .handlers
            .lock()
            .map_err(|e| BridgeError::Transport(format!("handler lock poisoned: {e}")))?
            .push(handler);
        Ok(())
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Stops answering probes, closes every channel and detaches the upstream.
    pub fn close(&self) -> Result<(), BridgeError> {
        {
            let mut tasks = self.inner.lock_tasks()?;
            if let Some(listener) = tasks.listener.take() {
                listener.abort();
            }
            if let Some(watch) = tasks.upstream_watch.take() {
                watch.abort();
            }
        }
        let drained: Vec<Arc<ClientChannel>> = self
            .inner
            .lock_channels()?
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in &drained {
            if let Err(e) = channel.close() {
                warn!(channel_id = channel.id(), error = %e, "channel close failed");
            }
            self.inner
                .events
                .emit(ConnectorEvent::ChannelClosed(channel.id().to_owned()));
        }
        self.inner.lock_canonical()?.upstream = None;
        info!(closed = drained.len(), "host connector closed");
        Ok(())
    }
}

impl std::fmt::Debug for HostConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.inner.lock_channels().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("HostConnector")
            .field("context", &self.inner.me.name())
            .field("channels", &channels)
            .finish()
    }
}

impl ConnectorInner {
    fn lock_canonical(&self) -> Result<MutexGuard<'_, Canonical>, BridgeError> {
        self.canonical
            .lock()
            .map_err(|e| BridgeError::Transport(format!("connector state lock poisoned: {e}")))
    }

    fn lock_channels(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, Arc<ClientChannel>>>, BridgeError> {
        self.channels
            .lock()
            .map_err(|e| BridgeError::Transport(format!("channel registry lock poisoned: {e}")))
    }

    fn lock_updates(&self) -> Result<MutexGuard<'_, ()>, BridgeError> {
        self.updates
            .lock()
            .map_err(|e| BridgeError::Transport(format!("update lock poisoned: {e}")))
    }

    /// Commits `mutate` to the canonical state and, when it reports a change, stages `apply` on
    /// every channel before the next update may start. Channel events are delivered once the
    /// ordering lock is released. Per-channel failures are logged; one broken channel does not
    /// stop the others.
    fn update<M, F>(&self, what: &str, mutate: M, apply: F) -> Result<bool, BridgeError>
    where
        M: FnOnce(&mut Canonical) -> bool,
        F: Fn(&ClientChannel) -> Result<Staged, BridgeError>,
    {
        let staged = {
            let _ordered = self.lock_updates()?;
            if !mutate(&mut *self.lock_canonical()?) {
                return Ok(false);
            }
            let channels: Vec<Arc<ClientChannel>> =
                self.lock_channels()?.values().cloned().collect();
            let mut staged = Vec::with_capacity(channels.len());
            for channel in channels {
                match apply(&channel) {
                    Ok(pending) => staged.push((channel, pending)),
                    Err(e) => warn!(
                        channel_id = channel.id(),
                        operation = what,
                        error = %e,
                        "channel update failed"
                    ),
                }
            }
            staged
        };
        for (channel, pending) in staged {
            if let Err(e) = channel.release(pending) {
                warn!(
                    channel_id = channel.id(),
                    operation = what,
                    error = %e,
                    "channel push failed"
                );
            }
        }
        Ok(true)
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, Tasks>, BridgeError> {
        self.tasks
            .lock()
            .map_err(|e| BridgeError::Transport(format!("task lock poisoned: {e}")))
    }

    fn accept_probe(
        self: &Arc<Self>,
        source: ContextRef,
        port: Option<MessagePort>,
    ) -> Result<(), BridgeError> {
        let channel = {
            let mut channels = self.lock_channels()?;
            let existing = channels
                .values()
                .find(|c| c.origin() == &source && c.state() != ChannelState::Closed)
                .cloned();
            match existing {
                Some(channel) => {
                    info!(channel_id = channel.id(), origin = source.name(), "reusing channel");
                    channel
                }
                None => {
                    let seed = {
                        let c = self.lock_canonical()?;
                        ChannelSeed {
                            enabled: self.config.auto_enable_channels,
                            chain_id: c.chain_id,
                            accounts: c.allowed_accounts.clone(),
                            context_accounts: c.context_accounts.clone(),
                            rpc_urls: c.rpc_urls.clone(),
                        }
                    };
                    let channel = Arc::new(ClientChannel::new(
                        uuid::Uuid::new_v4().to_string(),
                        source.clone(),
                        self.config.empty_address_policy,
                        EventQueue::new(self.config.resume_delay()),
                        seed,
                    ));
                    info!(channel_id = channel.id(), origin = source.name(), "new channel");
                    channels.insert(channel.id().to_owned(), Arc::clone(&channel));
                    channel
                }
            }
        };

        let (host_end, client_end) = match port {
            Some(port) => (port, None),
            None => {
                debug!(channel_id = channel.id(), "probe without a port; substituting a channel");
                let (host_end, client_end) = MessagePort::pair();
                (host_end, Some(client_end))
            }
        };
        let (sender, receiver) = host_end.split();
        let direct = sender.clone();
        let me = self.me.clone();
        let (binding, snapshot) = channel.bind(sender, move |snapshot| match client_end {
            None => direct.post(handshake_message(snapshot)),
            Some(port) => source.post(ContextMessage::Handshake {
                source: me,
                snapshot: snapshot.clone(),
                port,
            }),
        })?;

        let reader = spawn_channel_reader(
            Arc::downgrade(self),
            Arc::clone(&channel),
            receiver,
            binding,
        );
        channel.attach_reader(binding, reader);

        if !snapshot.allowed_accounts.is_empty() {
            channel.emit(ChannelEvent::Connect {
                chain_id: snapshot.chain_id,
            });
        }
        Ok(())
    }

    fn channel_gone(&self, channel: &Arc<ClientChannel>, binding: u64) {
        let newly_closed = match channel.transport_closed(binding) {
            Ok(newly_closed) => newly_closed,
            Err(e) => {
                warn!(channel_id = channel.id(), error = %e, "channel teardown failed");
                false
            }
        };
        // A stale binding means the channel was rebound and lives on.
        if !newly_closed && channel.state() != ChannelState::Closed {
            return;
        }
        let removed = match self.lock_channels() {
            Ok(mut channels) => match channels.get(channel.id()) {
                Some(current) if Arc::ptr_eq(current, channel) => {
                    channels.remove(channel.id());
                    true
                }
                _ => false,
            },
            Err(e) => {
                warn!(error = %e, "could not unregister channel");
                false
            }
        };
        if removed {
            self.events
                .emit(ConnectorEvent::ChannelClosed(channel.id().to_owned()));
        }
    }

    async fn handle_request(self: Arc<Self>, channel: Arc<ClientChannel>, request: RpcRequest) {
        // Requests wait for an in-flight provider setup but do not hold it.
        drop(self.setup.lock().await);

        let namespaced = RpcRequest {
            id: Value::String(namespace_id(channel.id(), &request.id)),
            ..request
        };
        debug!(
            channel_id = channel.id(),
            id = %namespaced.id,
            method = %namespaced.method,
            "request"
        );

        // Handlers see the namespaced id; it is stripped again only on the way back.
        let outcome = self.dispatch(&channel, &namespaced).await;
        self.observe(&channel, &namespaced, &outcome);

        let routed = RpcResponse::from_outcome(namespaced.id.clone(), outcome);
        let reply = match route_back(&channel, routed) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(channel_id = channel.id(), error = %e, "cannot route response");
                return;
            }
        };
        if let Err(e) = channel.send_raw(reply.to_value()) {
            warn!(channel_id = channel.id(), error = %e, "response not delivered");
        }
    }

    async fn dispatch(&self, channel: &ClientChannel, request: &RpcRequest) -> Outcome {
        if let Some(outcome) = self.short_circuit(channel, request) {
            debug!(channel_id = channel.id(), method = %request.method, "short circuit response");
            return outcome;
        }
        let upstream = self
            .lock_canonical()
            .ok()
            .and_then(|c| c.upstream.clone());
        let mut handlers: Vec<Arc<dyn RpcHandler>> =
            vec![Arc::new(UpstreamForwarder::new(upstream))];
        if let Ok(extra) = self.handlers.lock() {
            handlers.extend(extra.iter().cloned());
        }
        run_chain(&handlers, channel, request).await
    }

    /// Methods answered from host state without touching the upstream.
    fn short_circuit(&self, channel: &ClientChannel, request: &RpcRequest) -> Option<Outcome> {
        let chain_id = self.lock_canonical().map(|c| c.chain_id).unwrap_or(0);
        match request.method.as_str() {
            "eth_chainId" => Some(Ok(json!(format_chain_id(chain_id)))),
            "chainChanged" => {
                channel.emit(ChannelEvent::ChainChanged(chain_id));
                Some(Ok(json!([chain_id])))
            }
            "eth_accounts" => Some(Ok(accounts_to_value(&channel.visible_accounts()))),
            "eth_requestAccounts" | "accounts" => {
                let accounts = channel.visible_accounts();
                channel.emit(ChannelEvent::RequestAccounts(accounts.clone()));
                Some(Ok(accounts_to_value(&accounts)))
            }
            "contextAccountsChanged" => Some(Ok(accounts_to_value(&channel.context_accounts()))),
            "wallet_switchEthereumChain" => Some(self.switch_chain(&request.params)),
            _ => None,
        }
    }

    fn switch_chain(&self, params: &Value) -> Outcome {
        let requested = params
            .get(0)
            .and_then(|p| p.get("chainId"))
            .ok_or_else(|| RpcErrorObject::invalid_params("missing chainId"))?;
        let chain_id = parse_chain_id(requested)
            .map_err(|e| RpcErrorObject::invalid_params(e.to_string()))?;
        let changed = self
            .update(
                "wallet_switchEthereumChain",
                |c| std::mem::replace(&mut c.chain_id, chain_id) != chain_id,
                |channel| channel.stage_chain_id(chain_id),
            )
            .map_err(|e| RpcErrorObject::internal(e.to_string()))?;
        if changed {
            info!(chain_id, "chain switched by client request");
        }
        Ok(Value::Null)
    }

    /// Side effects of forwarded calls: transaction events and permission-driven account pushes.
    fn observe(&self, channel: &ClientChannel, request: &RpcRequest, outcome: &Outcome) {
        match request.method.as_str() {
            "eth_sendTransaction" => {
                let tx = request.params.get(0);
                let field = |name: &str| tx.and_then(|t| t.get(name));
                if let Err(e) = outcome {
                    warn!(channel_id = channel.id(), error = %e, "transaction failed");
                }
                channel.emit(ChannelEvent::SentTransaction(SentTransaction {
                    from: field("from").and_then(Value::as_str).map(parse_address),
                    to: field("to").and_then(Value::as_str).map(parse_address),
                    value: field("value").cloned(),
                    result: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().cloned(),
                }));
            }
            "wallet_requestPermissions" => {
                let Some(granted) = outcome.as_ref().ok().and_then(permission_accounts) else {
                    return;
                };
                if lists_differ(&granted, &channel.allowed_accounts()) {
                    info!(channel_id = channel.id(), "permissions granted new accounts");
                    if let Err(e) = channel.set_allowed_accounts(&granted) {
                        warn!(channel_id = channel.id(), error = %e, "account push failed");
                    }
                }
            }
            _ => {}
        }
    }
}

impl Drop for ConnectorInner {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(listener) = tasks.listener.take() {
                listener.abort();
            }
            if let Some(watch) = tasks.upstream_watch.take() {
                watch.abort();
            }
        }
    }
}

fn route_back(channel: &ClientChannel, routed: RpcResponse) -> Result<RpcResponse, BridgeError> {
    let namespaced = routed.id.as_str().ok_or_else(|| {
        BridgeError::Validation(format!("response id {} is not namespaced", routed.id))
    })?;
    let id = strip_namespace(channel.id(), namespaced)?;
    Ok(RpcResponse { id, ..routed })
}

fn spawn_listener(
    inner: Weak<ConnectorInner>,
    mut inbox: tokio::sync::mpsc::UnboundedReceiver<ContextMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let Some(connector) = inner.upgrade() else {
                return;
            };
            match message {
                ContextMessage::Probe { source, port } => {
                    debug!(origin = source.name(), with_port = port.is_some(), "probe received");
                    if let Err(e) = connector.accept_probe(source, port) {
                        warn!(error = %e, "probe not answered");
                    }
                }
                ContextMessage::Handshake { source, .. } => {
                    debug!(from = source.name(), "host ignores handshakes");
                }
            }
        }
    })
}

fn spawn_channel_reader(
    inner: Weak<ConnectorInner>,
    channel: Arc<ClientChannel>,
    mut receiver: PortReceiver,
    binding: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let Some(connector) = inner.upgrade() else {
                return;
            };
            match classify(&message) {
                Ok(Incoming::HandshakeAck) => match channel.mark_established() {
                    Ok(true) => {
                        info!(channel_id = channel.id(), "channel established");
                        connector
                            .events
                            .emit(ConnectorEvent::ChannelCreated(Arc::clone(&channel)));
                    }
                    Ok(false) => debug!(channel_id = channel.id(), "channel re-established"),
                    Err(e) => {
                        warn!(channel_id = channel.id(), error = %e, "unexpected acknowledgment")
                    }
                },
                Ok(Incoming::Request(request)) => {
                    tokio::spawn(connector.handle_request(Arc::clone(&channel), request));
                }
                Ok(other) => debug!(channel_id = channel.id(), ?other, "ignoring client message"),
                Err(e) => {
                    warn!(channel_id = channel.id(), error = %e, "dropping malformed message")
                }
            }
        }
        if let Some(connector) = inner.upgrade() {
            connector.channel_gone(&channel, binding);
        }
    })
}
