use up_provider_core::{
    channel_transition, discovery_transition, ChannelAction, ChannelState, DiscoveryAction,
    DiscoveryState,
};

#[test]
fn discovery_direct_path_transitions() {
    let (s1, _) = discovery_transition(DiscoveryState::Idle, DiscoveryAction::Start)
        .expect("idle -> probing");
    assert_eq!(s1, DiscoveryState::Probing);
    let (s2, t) =
        discovery_transition(s1, DiscoveryAction::Acknowledged).expect("probing -> connected");
    assert_eq!(s2, DiscoveryState::Connected);
    assert_eq!(t.from, DiscoveryState::Probing);
    let (s3, _) =
        discovery_transition(s2, DiscoveryAction::TransportClosed).expect("connected -> idle");
    assert_eq!(s3, DiscoveryState::Idle);
}

#[test]
fn discovery_search_path_transitions() {
    let (s1, _) =
        discovery_transition(DiscoveryState::Probing, DiscoveryAction::ProbeFailed).expect("retry");
    assert_eq!(s1, DiscoveryState::Retrying);
    let (s2, _) = discovery_transition(s1, DiscoveryAction::ProbeFailed).expect("retry again");
    assert_eq!(s2, DiscoveryState::Retrying);
    let (s3, t) = discovery_transition(s2, DiscoveryAction::Exhausted).expect("give up");
    assert_eq!(s3, DiscoveryState::Idle);
    assert_eq!(t.reason, "retry budget exhausted");
}

#[test]
fn discovery_illegal_transition_is_rejected() {
    let err = discovery_transition(DiscoveryState::Idle, DiscoveryAction::Acknowledged)
        .expect_err("must fail");
    assert!(err.to_string().contains("illegal discovery transition"));
}

#[test]
fn channel_lifecycle_transitions() {
    let (s1, _) = channel_transition(ChannelState::Unestablished, ChannelAction::Acknowledge)
        .expect("ack");
    assert_eq!(s1, ChannelState::Established);
    let (s2, _) = channel_transition(s1, ChannelAction::Rebind).expect("rebind");
    assert_eq!(s2, ChannelState::Unestablished);
    let (s3, _) = channel_transition(s2, ChannelAction::Close).expect("close");
    assert_eq!(s3, ChannelState::Closed);
    let err = channel_transition(s3, ChannelAction::Rebind).expect_err("closed is terminal");
    assert!(err.to_string().contains("illegal channel transition"));
}
