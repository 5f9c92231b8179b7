//! Host-side JSON-RPC handler chain.
//!
//! Each handler either answers a request or passes it on by returning `None`. The chain always
//! ends in a `method not found` answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use up_provider_core::wire::CODE_DISCONNECTED;
use up_provider_core::{is_method_not_supported, RpcErrorObject, RpcRequest, UpstreamProvider};

use crate::channel::ClientChannel;

pub type Outcome = Result<Value, RpcErrorObject>;

/// Handlers are shared by every channel of a connector. The request they receive carries an id
/// namespaced as `<channel id>:<client id>` (see [`up_provider_core::namespace_id`]), so ids from
/// different clients never collide in handler-side bookkeeping. The client gets its own id back.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// `None` hands the request to the next handler.
    async fn handle(&self, channel: &ClientChannel, request: &RpcRequest) -> Option<Outcome>;
}

/// Forwards to the wallet behind the host.
pub struct UpstreamForwarder {
    upstream: Option<Arc<dyn UpstreamProvider>>,
}

impl UpstreamForwarder {
    pub fn new(upstream: Option<Arc<dyn UpstreamProvider>>) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl RpcHandler for UpstreamForwarder {
    async fn handle(&self, channel: &ClientChannel, request: &RpcRequest) -> Option<Outcome> {
        let Some(upstream) = &self.upstream else {
            return Some(Err(RpcErrorObject::new(
                CODE_DISCONNECTED,
                "no upstream provider configured",
            )));
        };
        match upstream.request(&request.method, request.params.clone()).await {
            Ok(result) => Some(Ok(result)),
            Err(error) if is_method_not_supported(&error.message) => {
                debug!(
                    channel_id = channel.id(),
                    method = %request.method,
                    "upstream does not support method"
                );
                None
            }
            Err(error) => {
                warn!(
                    channel_id = channel.id(),
                    method = %request.method,
                    code = error.code,
                    message = %error.message,
                    "upstream rejected request"
                );
                Some(Err(error))
            }
        }
    }
}

pub async fn run_chain(
    handlers: &[Arc<dyn RpcHandler>],
    channel: &ClientChannel,
    request: &RpcRequest,
) -> Outcome {
    for handler in handlers {
        if let Some(outcome) = handler.handle(channel, request).await {
            return outcome;
        }
    }
    Err(RpcErrorObject::method_not_found(&request.method))
}
