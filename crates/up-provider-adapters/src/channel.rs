//! Host-side view of one embedded client.
//!
//! A [`ClientChannel`] keeps the last values it pushed to its client so every mutator can skip
//! redundant notifications. Accounts are only visible while the channel is enabled.

use std::sync::{Mutex, MutexGuard};

use alloy::primitives::Address;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use up_provider_core::{
    channel_transition, lists_differ, normalize, BridgeError, ChannelAction, ChannelEvent,
    ChannelState, EmptyAddressPolicy, Notification, Snapshot,
};

use crate::events::{EventQueue, ListenerId};
use crate::transport::{ContextRef, PortSender};

struct ChannelInner {
    enabled: bool,
    chain_id: u64,
    accounts: Vec<Address>,
    context_accounts: Vec<Address>,
    rpc_urls: Vec<String>,
    state: ChannelState,
    sender: Option<PortSender>,
    reader: Option<JoinHandle<()>>,
    binding: u64,
    announced: bool,
}

impl ChannelInner {
    fn visible(&self, policy: EmptyAddressPolicy) -> Vec<Address> {
        if self.enabled {
            normalize(&self.accounts, policy)
        } else {
            Vec::new()
        }
    }
}

/// Initial values for a new channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelSeed {
    pub enabled: bool,
    pub chain_id: u64,
    pub accounts: Vec<Address>,
    pub context_accounts: Vec<Address>,
    pub rpc_urls: Vec<String>,
}

pub struct ClientChannel {
    id: String,
    origin: ContextRef,
    policy: EmptyAddressPolicy,
    events: EventQueue<ChannelEvent>,
    inner: Mutex<ChannelInner>,
}

/// Pushes and local events produced by one mutation.
#[derive(Default)]
struct Outbox {
    notifications: Vec<Notification>,
    events: Vec<ChannelEvent>,
}

/// A mutation whose pushes are already posted. Its local events wait for
/// [`ClientChannel::release`].
#[must_use]
pub(crate) struct Staged {
    changed: bool,
    posted: Result<(), BridgeError>,
    events: Vec<ChannelEvent>,
}

impl Staged {
    fn unchanged() -> Self {
        Self {
            changed: false,
            posted: Ok(()),
            events: Vec::new(),
        }
    }
}

impl Outbox {
    fn push(&mut self, notification: Notification, event: Option<ChannelEvent>) {
        self.notifications.push(notification);
        self.events.extend(event);
    }

    /// Account visibility moved from `before` to `after`.
    fn visibility(&mut self, before: &[Address], after: Vec<Address>, chain_id: u64) {
        if !lists_differ(before, &after) {
            return;
        }
        let toggled = before.is_empty() != after.is_empty();
        let now_empty = after.is_empty();
        self.push(
            Notification::AccountsChanged(after.clone()),
            Some(ChannelEvent::AccountsChanged(after)),
        );
        if toggled {
            if now_empty {
                self.push(Notification::Disconnect, Some(ChannelEvent::Disconnect));
            } else {
                self.push(
                    Notification::Connect { chain_id },
                    Some(ChannelEvent::Connect { chain_id }),
                );
            }
        }
    }
}

impl ClientChannel {
    pub(crate) fn new(
        id: String,
        origin: ContextRef,
        policy: EmptyAddressPolicy,
        events: EventQueue<ChannelEvent>,
        seed: ChannelSeed,
    ) -> Self {
        Self {
            id,
            origin,
            policy,
            events,
            inner: Mutex::new(ChannelInner {
                enabled: seed.enabled,
                chain_id: seed.chain_id,
                accounts: normalize(&seed.accounts, policy),
                context_accounts: normalize(&seed.context_accounts, policy),
                rpc_urls: seed.rpc_urls,
                state: ChannelState::Unestablished,
                sender: None,
                reader: None,
                binding: 0,
                announced: false,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChannelInner>, BridgeError> {
        self.inner
            .lock()
            .map_err(|e| BridgeError::Transport(format!("channel lock poisoned: {e}")))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> &ContextRef {
        &self.origin
    }

    pub fn state(&self) -> ChannelState {
        self.lock().map(|g| g.state).unwrap_or(ChannelState::Closed)
    }

    pub fn enabled(&self) -> bool {
        self.lock().map(|g| g.enabled).unwrap_or(false)
    }

    pub fn chain_id(&self) -> u64 {
        self.lock().map(|g| g.chain_id).unwrap_or(0)
    }

    /// Allowed accounts as last set, regardless of the enabled flag.
    pub fn allowed_accounts(&self) -> Vec<Address> {
        self.lock().map(|g| g.accounts.clone()).unwrap_or_default()
    }

    /// What the client currently sees: empty while disabled.
    pub fn visible_accounts(&self) -> Vec<Address> {
        self.lock()
            .map(|g| g.visible(self.policy))
            .unwrap_or_default()
    }

    pub fn context_accounts(&self) -> Vec<Address> {
        self.lock()
            .map(|g| g.context_accounts.clone())
            .unwrap_or_default()
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.lock().map(|g| g.rpc_urls.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Result<Snapshot, BridgeError> {
        let g = self.lock()?;
        Ok(self.snapshot_of(&g))
    }

    fn snapshot_of(&self, g: &ChannelInner) -> Snapshot {
        Snapshot {
            chain_id: g.chain_id,
            allowed_accounts: g.visible(self.policy),
            context_accounts: g.context_accounts.clone(),
            rpc_urls: g.rpc_urls.clone(),
        }
    }

    pub fn set_allowed_accounts(&self, accounts: &[Address]) -> Result<bool, BridgeError> {
        self.release(self.stage_allowed_accounts(accounts)?)
    }

    pub(crate) fn stage_allowed_accounts(
        &self,
        accounts: &[Address],
    ) -> Result<Staged, BridgeError> {
        let next = normalize(accounts, self.policy);
        let mut g = self.lock()?;
        if !lists_differ(&g.accounts, &next) {
            return Ok(Staged::unchanged());
        }
        debug!(channel_id = %self.id, accounts = next.len(), "allowed accounts changed");
        let mut out = Outbox::default();
        let before = g.visible(self.policy);
        g.accounts = next;
        let after = g.visible(self.policy);
        out.visibility(&before, after, g.chain_id);
        Ok(self.post(&g, out))
    }

    pub fn set_context_accounts(&self, accounts: &[Address]) -> Result<bool, BridgeError> {
        self.release(self.stage_context_accounts(accounts)?)
    }

    pub(crate) fn stage_context_accounts(
        &self,
        accounts: &[Address],
    ) -> Result<Staged, BridgeError> {
        let next = normalize(accounts, self.policy);
        let mut g = self.lock()?;
        if !lists_differ(&g.context_accounts, &next) {
            return Ok(Staged::unchanged());
        }
        g.context_accounts = next.clone();
        let mut out = Outbox::default();
        out.push(
            Notification::ContextAccountsChanged(next.clone()),
            Some(ChannelEvent::ContextAccountsChanged(next)),
        );
        Ok(self.post(&g, out))
    }

    pub fn set_chain_id(&self, chain_id: u64) -> Result<bool, BridgeError> {
        self.release(self.stage_chain_id(chain_id)?)
    }

    pub(crate) fn stage_chain_id(&self, chain_id: u64) -> Result<Staged, BridgeError> {
        let mut g = self.lock()?;
        if g.chain_id == chain_id {
            return Ok(Staged::unchanged());
        }
        g.chain_id = chain_id;
        let mut out = Outbox::default();
        out.push(
            Notification::ChainChanged(chain_id),
            Some(ChannelEvent::ChainChanged(chain_id)),
        );
        Ok(self.post(&g, out))
    }

    pub fn set_rpc_urls(&self, urls: &[String]) -> Result<bool, BridgeError> {
        self.release(self.stage_rpc_urls(urls)?)
    }

    pub(crate) fn stage_rpc_urls(&self, urls: &[String]) -> Result<Staged, BridgeError> {
        let mut g = self.lock()?;
        if !lists_differ(&g.rpc_urls, urls) {
            return Ok(Staged::unchanged());
        }
        g.rpc_urls = urls.to_vec();
        let mut out = Outbox::default();
        out.push(Notification::RpcUrlsChanged(urls.to_vec()), None);
        Ok(self.post(&g, out))
    }

    pub fn set_enable(&self, enabled: bool) -> Result<bool, BridgeError> {
        let staged = {
            let mut g = self.lock()?;
            if g.enabled == enabled {
                return Ok(false);
            }
            info!(channel_id = %self.id, enabled, "channel enablement changed");
            let mut out = Outbox::default();
            let before = g.visible(self.policy);
            g.enabled = enabled;
            let after = g.visible(self.policy);
            out.visibility(&before, after, g.chain_id);
            self.post(&g, out)
        };
        self.release(staged)
    }

    /// Applies every piece of channel state at once; chain, context accounts, then account
    /// visibility are pushed in that order and only when changed.
    pub fn setup_channel(
        &self,
        enabled: bool,
        accounts: &[Address],
        context_accounts: &[Address],
        chain_id: u64,
    ) -> Result<(), BridgeError> {
        let accounts = normalize(accounts, self.policy);
        let context_accounts = normalize(context_accounts, self.policy);
        let staged = {
            let mut g = self.lock()?;
            let mut out = Outbox::default();
            let before = g.visible(self.policy);
            if g.chain_id != chain_id {
                g.chain_id = chain_id;
                out.push(
                    Notification::ChainChanged(chain_id),
                    Some(ChannelEvent::ChainChanged(chain_id)),
                );
            }
            if lists_differ(&g.context_accounts, &context_accounts) {
                g.context_accounts = context_accounts.clone();
                out.push(
                    Notification::ContextAccountsChanged(context_accounts.clone()),
                    Some(ChannelEvent::ContextAccountsChanged(context_accounts)),
                );
            }
            g.accounts = accounts;
            g.enabled = enabled;
            let after = g.visible(self.policy);
            out.visibility(&before, after, g.chain_id);
            self.post(&g, out)
        };
        self.release(staged).map(|_| ())
    }

    /// Sends a raw JSON message to the client.
    pub fn send_raw(&self, message: Value) -> Result<(), BridgeError> {
        let g = self.lock()?;
        match &g.sender {
            Some(sender) => sender.post(message),
            None => Err(BridgeError::NotConnected(format!(
                "channel {} has no transport",
                self.id
            ))),
        }
    }

    /// Posts with the channel lock held so the client sees pushes in the order the state moved.
    fn post(&self, g: &ChannelInner, out: Outbox) -> Staged {
        let mut posted = Ok(());
        match &g.sender {
            Some(sender) => {
                for notification in &out.notifications {
                    debug!(channel_id = %self.id, method = notification.method(), "push");
                    if let Err(e) = sender.post(notification.to_message()) {
                        warn!(channel_id = %self.id, error = %e, "push failed");
                        posted = Err(e);
                        break;
                    }
                }
            }
            None if !out.notifications.is_empty() => {
                debug!(
                    channel_id = %self.id,
                    "no transport yet; state kept for the next handshake"
                );
            }
            None => {}
        }
        Staged {
            changed: true,
            posted,
            events: out.events,
        }
    }

    /// Delivers the local events of `staged`. Call without holding any lock listeners may need.
    pub(crate) fn release(&self, staged: Staged) -> Result<bool, BridgeError> {
        for event in staged.events {
            self.events.emit(event);
        }
        staged.posted.map(|()| staged.changed)
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        self.events.emit(event);
    }

    /// Attaches a (new) transport. `announce` sends the handshake under the channel lock, so no
    /// push can overtake it. Returns the binding number the reader must present later together
    /// with the announced snapshot.
    pub(crate) fn bind<F>(
        &self,
        sender: PortSender,
        announce: F,
    ) -> Result<(u64, Snapshot), BridgeError>
    where
        F: FnOnce(&Snapshot) -> Result<(), BridgeError>,
    {
        let mut g = self.lock()?;
        let rebound = if g.sender.is_some() {
            Some(channel_transition(g.state, ChannelAction::Rebind)?.0)
        } else if g.state == ChannelState::Closed {
            return Err(BridgeError::TransportClosed(format!(
                "channel {} is closed",
                self.id
            )));
        } else {
            None
        };
        let snapshot = self.snapshot_of(&g);
        announce(&snapshot)?;
        if let Some(next) = rebound {
            g.state = next;
        }
        if let Some(reader) = g.reader.take() {
            reader.abort();
        }
        g.sender = Some(sender);
        g.binding += 1;
        Ok((g.binding, snapshot))
    }

    pub(crate) fn attach_reader(&self, binding: u64, reader: JoinHandle<()>) {
        match self.lock() {
            Ok(mut g) if g.binding == binding => g.reader = Some(reader),
            _ => reader.abort(),
        }
    }

    /// Returns `true` only for the first acknowledgment this channel ever receives.
    pub(crate) fn mark_established(&self) -> Result<bool, BridgeError> {
        let mut g = self.lock()?;
        let (next, _) = channel_transition(g.state, ChannelAction::Acknowledge)?;
        g.state = next;
        let first = !g.announced;
        g.announced = true;
        Ok(first)
    }

    /// Drops the transport so the client observes closure. Idempotent.
    ///
    /// The reader keeps running until the client hangs up its end, which unregisters the channel.
    pub fn close(&self) -> Result<bool, BridgeError> {
        {
            let mut g = self.lock()?;
            if g.state == ChannelState::Closed {
                return Ok(false);
            }
            let (next, _) = channel_transition(g.state, ChannelAction::Close)?;
            g.state = next;
            g.sender = None;
        }
        info!(channel_id = %self.id, "channel closed");
        self.events.emit(ChannelEvent::Closed);
        Ok(true)
    }

    /// Closure reported by the reader of `binding`. Stale bindings are ignored.
    pub(crate) fn transport_closed(&self, binding: u64) -> Result<bool, BridgeError> {
        {
            let mut g = self.lock()?;
            if g.binding != binding || g.state == ChannelState::Closed {
                return Ok(false);
            }
            let (next, _) = channel_transition(g.state, ChannelAction::Close)?;
            g.state = next;
            g.sender = None;
            g.reader = None;
        }
        info!(channel_id = %self.id, "client transport closed");
        self.events.emit(ChannelEvent::Closed);
        Ok(true)
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("id", &self.id)
            .field("origin", &self.origin.name())
            .field("state", &self.state())
            .finish()
    }
}
