use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Discovery progress of one client bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    Idle,
    Probing,
    Retrying,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryAction {
    Start,
    ProbeFailed,
    Acknowledged,
    Exhausted,
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Unestablished,
    Established,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelAction {
    Acknowledge,
    Rebind,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
    pub reason: &'static str,
}

pub fn discovery_transition(
    from: DiscoveryState,
    action: DiscoveryAction,
) -> Result<(DiscoveryState, StateTransition<DiscoveryState>), BridgeError> {
    use DiscoveryAction as A;
    use DiscoveryState as S;

    let (to, reason) = match (from, action) {
        (S::Idle, A::Start) => (S::Probing, "discovery started"),
        (S::Probing, A::ProbeFailed) => (S::Retrying, "direct probe failed"),
        (S::Retrying, A::ProbeFailed) => (S::Retrying, "ancestor probe failed"),
        (S::Probing, A::Acknowledged) => (S::Connected, "direct probe acknowledged"),
        (S::Retrying, A::Acknowledged) => (S::Connected, "ancestor probe acknowledged"),
        (S::Probing, A::Exhausted) => (S::Idle, "explicit target did not answer"),
        (S::Retrying, A::Exhausted) => (S::Idle, "retry budget exhausted"),
        (S::Connected, A::TransportClosed) => (S::Idle, "channel closed"),
        _ => {
            return Err(BridgeError::Validation(format!(
                "illegal discovery transition: {from:?} --{action:?}-->"
            )))
        }
    };
    Ok((to, StateTransition { from, to, reason }))
}

pub fn channel_transition(
    from: ChannelState,
    action: ChannelAction,
) -> Result<(ChannelState, StateTransition<ChannelState>), BridgeError> {
    use ChannelAction as A;
    use ChannelState as S;

    let (to, reason) = match (from, action) {
        (S::Unestablished, A::Acknowledge) => (S::Established, "client adopted snapshot"),
        (S::Established, A::Acknowledge) => (S::Established, "duplicate acknowledgment"),
        (S::Unestablished | S::Established, A::Rebind) => {
            (S::Unestablished, "same context probed again")
        }
        (S::Unestablished | S::Established, A::Close) => (S::Closed, "transport closed"),
        _ => {
            return Err(BridgeError::Validation(format!(
                "illegal channel transition: {from:?} --{action:?}-->"
            )))
        }
    };
    Ok((to, StateTransition { from, to, reason }))
}
