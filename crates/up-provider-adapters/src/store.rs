use std::sync::{Mutex, MutexGuard};

use up_provider_core::{BridgeError, PersistedState, StateStore};

/// Process-local [`StateStore`]; survives client rebuilds within one process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    value: Mutex<Option<PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            value: Mutex::new(Some(state)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<PersistedState>>, BridgeError> {
        self.value
            .lock()
            .map_err(|e| BridgeError::Transport(format!("state store lock poisoned: {e}")))
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self) -> Result<Option<PersistedState>, BridgeError> {
        Ok(self.lock()?.clone())
    }

    fn set(&self, value: &PersistedState) -> Result<(), BridgeError> {
        *self.lock()? = Some(value.clone());
        Ok(())
    }
}
