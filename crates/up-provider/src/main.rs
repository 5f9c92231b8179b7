//! UP provider bridge demo: a host connector wrapping an in-memory wallet, and an embedded client
//! that discovers it and drives one scripted session.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use eyre::WrapErr;
use serde_json::json;
use tracing::{info, warn};

use up_provider_adapters::{
    AnnouncementBus, BridgeConfig, BusMessage, ClientBridge, ConnectorConfig, ConnectorEvent,
    DiscoveryTarget, ExecutionContext, HostConnector, MemoryStateStore, ProviderInfo,
};
use up_provider_core::ClientEvent;

mod wallet;

use wallet::DemoWallet;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting UP provider bridge demo");

    let profile = Address::repeat_byte(0x11);
    let other = Address::repeat_byte(0x22);
    let wallet = Arc::new(DemoWallet::new(42, vec![profile]));

    let connector = HostConnector::new(ConnectorConfig::from_env(), ExecutionContext::new("host"))
        .wrap_err("failed to start host connector")?;
    connector.on(|event| match event {
        ConnectorEvent::ChannelCreated(channel) => {
            info!(channel_id = channel.id(), origin = channel.origin().name(), "client attached")
        }
        ConnectorEvent::ChannelClosed(id) => info!(channel_id = %id, "client detached"),
    });
    connector
        .setup_provider(wallet.clone(), Vec::new())
        .await
        .wrap_err("failed to attach wallet")?;
    connector
        .set_context_accounts(&[other])
        .wrap_err("failed to set context accounts")?;

    let client = ClientBridge::new(
        BridgeConfig::from_env(),
        ExecutionContext::new("embedded"),
        DiscoveryTarget::ancestors(vec![connector.context()]),
        Some(Arc::new(MemoryStateStore::new())),
    )
    .wrap_err("failed to build client bridge")?;
    client.on(|event| match event {
        ClientEvent::AccountsChanged(accounts) => info!(?accounts, "accountsChanged"),
        ClientEvent::ChainChanged(chain_id) => info!(chain_id, "chainChanged"),
        other => info!(?other, "client event"),
    });

    let bus = AnnouncementBus::default();
    let mut announcements = bus.subscribe();
    let registration = bus.register(ProviderInfo::default(), client.clone());
    if let Ok(BusMessage::Announce(announcement)) = announcements.recv().await {
        info!(name = %announcement.info.name, rdns = %announcement.info.rdns, "provider announced");
    }

    let chain_id = client.request("eth_chainId").await?;
    let accounts = client.request("eth_accounts").await?;
    info!(%chain_id, %accounts, "connected");

    let balance = client
        .request(("eth_getBalance", json!([format!("{profile:#x}"), "latest"])))
        .await?;
    info!(%balance, "balance");

    let tx_hash = client
        .request((
            "eth_sendTransaction",
            json!([{
                "from": format!("{profile:#x}"),
                "to": format!("{other:#x}"),
                "value": "0x1",
            }]),
        ))
        .await?;
    info!(%tx_hash, "transaction sent");

    wallet.select_accounts(vec![other]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(accounts = ?client.accounts(), "after wallet account switch");

    client
        .request(("wallet_switchEthereumChain", json!([{ "chainId": "0x1" }])))
        .await?;
    info!(chain_id = client.chain_id(), "after chain switch");

    match client.request("eth_signTypedData_v4").await {
        Ok(value) => info!(%value, "unexpected success"),
        Err(e) => warn!(error = %e, "unsupported method rejected"),
    }

    registration.abort();
    connector.close().wrap_err("failed to close connector")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(connected = client.has_channel(), "session finished");
    Ok(())
}
