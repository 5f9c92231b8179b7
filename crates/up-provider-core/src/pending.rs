use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::BridgeError;

pub type Completion = oneshot::Sender<Result<Value, BridgeError>>;

#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub params: Value,
    pub sent: bool,
    completion: Completion,
}

impl PendingRequest {
    pub fn resolve(self, result: Value) {
        let _ = self.completion.send(Ok(result));
    }

    pub fn reject(self, error: BridgeError) {
        let _ = self.completion.send(Err(error));
    }
}

/// Requests awaiting a response, keyed by their JSON-RPC id.
#[derive(Debug, Clone, Default)]
pub struct RequestTable {
    inner: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl RequestTable {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, PendingRequest>>, BridgeError> {
        self.inner
            .lock()
            .map_err(|e| BridgeError::Transport(format!("request table lock poisoned: {e}")))
    }

    pub fn register(
        &self,
        id: &str,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Result<Value, BridgeError>>, BridgeError> {
        let mut g = self.lock()?;
        if g.contains_key(id) {
            return Err(BridgeError::Validation(format!(
                "request id {id} is already pending"
            )));
        }
        let (completion, receiver) = oneshot::channel();
        g.insert(
            id.to_owned(),
            PendingRequest {
                method: method.to_owned(),
                params,
                sent: false,
                completion,
            },
        );
        Ok(receiver)
    }

    pub fn mark_sent(&self, id: &str) -> Result<(), BridgeError> {
        if let Some(item) = self.lock()?.get_mut(id) {
            item.sent = true;
        }
        Ok(())
    }

    pub fn take(&self, id: &str) -> Result<Option<PendingRequest>, BridgeError> {
        Ok(self.lock()?.remove(id))
    }

    /// Returns `false` for an unknown id.
    pub fn resolve(&self, id: &str, result: Value) -> Result<bool, BridgeError> {
        match self.take(id)? {
            Some(item) => {
                item.resolve(result);
                Ok(true)
            }
            None => {
                warn!(id, "resolve for unknown request id");
                Ok(false)
            }
        }
    }

    /// Returns `false` for an unknown id.
    pub fn reject(&self, id: &str, error: BridgeError) -> Result<bool, BridgeError> {
        match self.take(id)? {
            Some(item) => {
                item.reject(error);
                Ok(true)
            }
            None => {
                warn!(id, %error, "reject for unknown request id");
                Ok(false)
            }
        }
    }

    /// Rejects every outstanding request, returning how many there were.
    pub fn reject_all(&self, error: &BridgeError) -> Result<usize, BridgeError> {
        let drained: Vec<PendingRequest> = self.lock()?.drain().map(|(_, item)| item).collect();
        let count = drained.len();
        for item in drained {
            item.reject(error.clone());
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
