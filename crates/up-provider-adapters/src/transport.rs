//! In-process stand-ins for execution contexts and their message ports.
//!
//! A [`MessagePort`] is one end of a bidirectional JSON channel. The peer observes closure once
//! every sender for its inbound direction is gone. An [`ExecutionContext`] is a mailbox that
//! receives discovery probes and substituted-channel handshakes, addressed through a cloneable
//! [`ContextRef`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use up_provider_core::{BridgeError, Snapshot, TrustDomain};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl PortSender {
    pub fn post(&self, message: Value) -> Result<(), BridgeError> {
        self.tx
            .send(message)
            .map_err(|_| BridgeError::TransportClosed("peer port is closed".to_owned()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl PortReceiver {
    /// `None` once the peer has dropped every sender.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
pub struct MessagePort {
    sender: PortSender,
    receiver: PortReceiver,
}

impl MessagePort {
    /// Two entangled ports: whatever one posts, the other receives.
    pub fn pair() -> (MessagePort, MessagePort) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MessagePort {
                sender: PortSender { tx: b_tx },
                receiver: PortReceiver { rx: a_rx },
            },
            MessagePort {
                sender: PortSender { tx: a_tx },
                receiver: PortReceiver { rx: b_rx },
            },
        )
    }

    pub fn post(&self, message: Value) -> Result<(), BridgeError> {
        self.sender.post(message)
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

/// Messages delivered to a context mailbox rather than over a channel.
#[derive(Debug)]
pub enum ContextMessage {
    /// "Is a host present here?" with an optional dedicated channel endpoint.
    Probe {
        source: ContextRef,
        port: Option<MessagePort>,
    },
    /// Host acknowledgment that substitutes a channel of its own making.
    Handshake {
        source: ContextRef,
        snapshot: Snapshot,
        port: MessagePort,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Address of an execution context, as seen by whoever holds the handle.
#[derive(Debug, Clone)]
pub struct ContextRef {
    id: ContextId,
    name: String,
    capability: TrustDomain,
    inbox: mpsc::UnboundedSender<ContextMessage>,
}

impl ContextRef {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability probe: whether a dedicated channel endpoint can be handed to this context.
    pub fn capability(&self) -> TrustDomain {
        self.capability
    }

    /// The same context viewed across a different trust boundary.
    pub fn with_capability(&self, capability: TrustDomain) -> Self {
        Self {
            capability,
            ..self.clone()
        }
    }

    pub fn post(&self, message: ContextMessage) -> Result<(), BridgeError> {
        self.inbox.send(message).map_err(|_| {
            BridgeError::TransportClosed(format!("context {} is gone", self.name))
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.inbox.is_closed()
    }
}

impl PartialEq for ContextRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContextRef {}

pub struct ExecutionContext {
    handle: ContextRef,
    inbox: mpsc::UnboundedReceiver<ContextMessage>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: ContextRef {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                capability: TrustDomain::SameDomain,
                inbox: tx,
            },
            inbox: rx,
        }
    }

    pub fn handle(&self) -> ContextRef {
        self.handle.clone()
    }

    pub fn into_parts(self) -> (ContextRef, mpsc::UnboundedReceiver<ContextMessage>) {
        (self.handle, self.inbox)
    }
}
