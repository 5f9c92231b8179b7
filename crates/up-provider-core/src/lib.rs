pub mod accounts;
pub mod domain;
pub mod error;
pub mod pending;
pub mod ports;
pub mod state_machine;
pub mod wire;

pub use accounts::{
    accounts_to_value, lists_differ, normalize, parse_accounts, EmptyAddressPolicy, Slot,
};
pub use domain::{ChannelEvent, ClientEvent, SentTransaction, Snapshot, TrustDomain};
pub use error::BridgeError;
pub use pending::{PendingRequest, RequestTable};
pub use ports::{PersistedState, StateStore, UpstreamProvider};
pub use state_machine::{
    channel_transition, discovery_transition, ChannelAction, ChannelState, DiscoveryAction,
    DiscoveryState, StateTransition,
};
pub use wire::{
    classify, format_chain_id, is_method_not_supported, namespace_id, parse_chain_id,
    permission_accounts, request_key, strip_namespace, Incoming, Notification, RpcErrorObject,
    RpcRequest, RpcResponse,
};
