pub mod announce;
pub mod channel;
pub mod client;
pub mod config;
pub mod connector;
pub mod discovery;
pub mod dispatch;
pub mod events;
pub mod fallback;
pub mod store;
pub mod transport;

pub use announce::{AnnouncementBus, BusMessage, ProviderAnnouncement, ProviderInfo};
pub use channel::{ChannelSeed, ClientChannel};
pub use client::{ClientBridge, RpcCall};
pub use config::{BridgeConfig, ConnectorConfig};
pub use connector::{ChannelLookup, ConnectorEvent, HostConnector};
pub use discovery::{find_host, probe, DiscoveryTarget, Handshake};
pub use dispatch::{run_chain, Outcome, RpcHandler, UpstreamForwarder};
pub use events::{EventQueue, ListenerId};
pub use fallback::{is_fallback_eligible, RpcFallback};
pub use store::MemoryStateStore;
pub use transport::{
    ContextId, ContextMessage, ContextRef, ExecutionContext, MessagePort, PortReceiver, PortSender,
};
