//! Provider announcement side channel.
//!
//! A registered provider is announced once on the bus and again every time someone broadcasts a
//! providers request. This is fire-and-forget; nothing here touches the bridge protocol.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::ClientBridge;

const DEFAULT_ICON: &str = "data:image/svg+xml,%3Csvg%20xmlns%3D%22http%3A%2F%2Fwww.w3.org%2F2000%2Fsvg%22%20viewBox%3D%220%200%2032%2032%22%3E%3Ccircle%20cx%3D%2216%22%20cy%3D%2216%22%20r%3D%2216%22%20fill%3D%22%23fe005b%22%2F%3E%3C%2Fsvg%3E";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>, icon: impl Into<String>, rdns: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            icon: icon.into(),
            rdns: rdns.into(),
        }
    }
}

impl Default for ProviderInfo {
    fn default() -> Self {
        Self::new("UE Universal Profile", DEFAULT_ICON, "dev.lukso.auth")
    }
}

#[derive(Debug, Clone)]
pub struct ProviderAnnouncement {
    pub info: ProviderInfo,
    pub provider: ClientBridge,
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    Announce(ProviderAnnouncement),
    RequestProviders,
}

#[derive(Debug, Clone)]
pub struct AnnouncementBus {
    tx: broadcast::Sender<BusMessage>,
}

impl Default for AnnouncementBus {
    fn default() -> Self {
        Self::new(16)
    }
}

impl AnnouncementBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    pub fn request_providers(&self) {
        if self.tx.send(BusMessage::RequestProviders).is_err() {
            debug!("providers requested with nobody listening");
        }
    }

    /// Announces `provider` now and on every later request. Abort the handle to unregister.
    pub fn register(&self, info: ProviderInfo, provider: ClientBridge) -> JoinHandle<()> {
        let announcement = ProviderAnnouncement { info, provider };
        let mut requests = self.tx.subscribe();
        let tx = self.tx.clone();
        announce(&tx, &announcement);
        tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(BusMessage::RequestProviders) => announce(&tx, &announcement),
                    Ok(BusMessage::Announce(_)) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "announcement bus lagged"),
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

fn announce(tx: &broadcast::Sender<BusMessage>, announcement: &ProviderAnnouncement) {
    debug!(uuid = %announcement.info.uuid, name = %announcement.info.name, "announcing provider");
    if tx.send(BusMessage::Announce(announcement.clone())).is_err() {
        debug!("announcement with nobody listening");
    }
}
