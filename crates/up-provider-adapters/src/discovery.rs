//! Locating a host among candidate contexts.
//!
//! A probe hands the candidate a fresh channel endpoint when the candidate's capability allows it
//! and then waits, bounded by the probe timeout, for a snapshot-carrying acknowledgment. The
//! acknowledgment may arrive on the prober's own endpoint or, when the host substitutes a channel,
//! through the prober's context mailbox. Callers never need to know which happened.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use up_provider_core::{
    classify, BridgeError, DiscoveryAction, Incoming, Snapshot, TrustDomain,
};

use crate::config::BridgeConfig;
use crate::transport::{ContextMessage, ContextRef, MessagePort};

/// Candidates a client may probe, as enumerated by the embedding environment.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryTarget {
    /// Probed first. With search disabled it is the only candidate.
    pub explicit: Option<ContextRef>,
    /// Nearest ancestor first, top-level context last.
    pub ancestors: Vec<ContextRef>,
}

impl DiscoveryTarget {
    pub fn explicit(target: ContextRef) -> Self {
        Self {
            explicit: Some(target),
            ancestors: Vec::new(),
        }
    }

    pub fn ancestors(chain: Vec<ContextRef>) -> Self {
        Self {
            explicit: None,
            ancestors: chain,
        }
    }

    fn first(&self) -> Option<&ContextRef> {
        self.explicit.as_ref().or_else(|| self.ancestors.first())
    }
}

/// A successful probe.
#[derive(Debug)]
pub struct Handshake {
    pub host: ContextRef,
    pub snapshot: Snapshot,
    pub port: MessagePort,
    /// The host replied with a channel of its own making.
    pub substituted: bool,
}

pub type Mailbox = mpsc::UnboundedReceiver<ContextMessage>;

/// Sends one probe to `candidate` and waits at most `timeout` for its acknowledgment.
pub async fn probe(
    me: &ContextRef,
    inbox: &mut Mailbox,
    candidate: &ContextRef,
    timeout: Duration,
) -> Result<Handshake, BridgeError> {
    let capability = candidate.capability();
    let (mut near, transferred) = match capability {
        TrustDomain::SameDomain | TrustDomain::Unknown => {
            let (near, far) = MessagePort::pair();
            (Some(near), Some(far))
        }
        TrustDomain::CrossDomain => {
            debug!(
                candidate = candidate.name(),
                "cross-domain candidate, expecting a substituted channel"
            );
            (None, None)
        }
    };

    candidate
        .post(ContextMessage::Probe {
            source: me.clone(),
            port: transferred,
        })
        .map_err(|e| {
            BridgeError::DiscoveryFailure(format!("probe to {} failed: {e}", candidate.name()))
        })?;

    let mut near_open = near.is_some();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let (snapshot, substitute) = loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(BridgeError::DiscoveryFailure(format!(
                    "No UP found: {} did not answer within {}ms",
                    candidate.name(),
                    timeout.as_millis()
                )));
            }
            message = recv_on(&mut near), if near_open => match message {
                Some(value) => match classify(&value) {
                    Ok(Incoming::Handshake(snapshot)) => break (snapshot, None),
                    Ok(other) => debug!(?other, "ignoring pre-handshake traffic"),
                    Err(e) => warn!(error = %e, "dropping malformed probe reply"),
                },
                None => {
                    debug!(candidate = candidate.name(), "probe endpoint released by candidate");
                    near_open = false;
                }
            },
            message = inbox.recv() => match message {
                Some(ContextMessage::Handshake {
                    source,
                    snapshot,
                    port,
                }) if source == *candidate => break (snapshot, Some(port)),
                Some(ContextMessage::Handshake { source, .. }) => {
                    debug!(from = source.name(), "handshake from a context that was not probed");
                }
                Some(ContextMessage::Probe { source, .. }) => {
                    debug!(from = source.name(), "ignoring probe addressed to a client context");
                }
                None => {
                    return Err(BridgeError::DiscoveryFailure("context mailbox closed".to_owned()));
                }
            },
        }
    };

    match (substitute, near.take()) {
        (Some(port), _) => Ok(Handshake {
            host: candidate.clone(),
            snapshot,
            port,
            substituted: true,
        }),
        (None, Some(port)) => Ok(Handshake {
            host: candidate.clone(),
            snapshot,
            port,
            substituted: false,
        }),
        (None, None) => Err(BridgeError::DiscoveryFailure(
            "handshake arrived without a channel".to_owned(),
        )),
    }
}

async fn recv_on(port: &mut Option<MessagePort>) -> Option<serde_json::Value> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}

/// Runs the full discovery sequence: the direct candidate first, then, when searching is enabled,
/// `retry_cycles` walks of the ancestor chain separated by `retry_delay`.
///
/// `observe` receives every state-machine action in order.
pub async fn find_host<F>(
    config: &BridgeConfig,
    me: &ContextRef,
    inbox: &mut Mailbox,
    target: &DiscoveryTarget,
    mut observe: F,
) -> Result<Handshake, BridgeError>
where
    F: FnMut(DiscoveryAction),
{
    observe(DiscoveryAction::Start);

    let Some(first) = target.first() else {
        observe(DiscoveryAction::Exhausted);
        return Err(BridgeError::DiscoveryFailure(
            "No UP found: no candidate context to probe".to_owned(),
        ));
    };

    let first_error = match probe(me, inbox, first, config.probe_timeout()).await {
        Ok(handshake) => {
            info!(host = first.name(), substituted = handshake.substituted, "host found");
            observe(DiscoveryAction::Acknowledged);
            return Ok(handshake);
        }
        Err(e) => e,
    };
    observe(DiscoveryAction::ProbeFailed);

    if !config.search {
        warn!(candidate = first.name(), error = %first_error, "explicit target did not answer");
        observe(DiscoveryAction::Exhausted);
        return Err(first_error);
    }

    for cycle in 0..config.retry_cycles {
        for candidate in &target.ancestors {
            match probe(me, inbox, candidate, config.probe_timeout()).await {
                Ok(handshake) => {
                    info!(
                        host = candidate.name(),
                        cycle,
                        substituted = handshake.substituted,
                        "host found"
                    );
                    observe(DiscoveryAction::Acknowledged);
                    return Ok(handshake);
                }
                Err(e) => {
                    debug!(candidate = candidate.name(), cycle, error = %e, "probe failed");
                    observe(DiscoveryAction::ProbeFailed);
                }
            }
        }
        tokio::time::sleep(config.retry_delay()).await;
    }

    observe(DiscoveryAction::Exhausted);
    warn!(cycles = config.retry_cycles, "retry budget exhausted");
    Err(BridgeError::DiscoveryFailure(format!(
        "No UP found after {} search cycles",
        config.retry_cycles
    )))
}
