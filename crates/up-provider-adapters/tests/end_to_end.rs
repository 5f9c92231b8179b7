mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use up_provider_adapters::{
    AnnouncementBus, BusMessage, ClientChannel, MemoryStateStore, ProviderInfo, RpcCall,
    RpcHandler, Outcome,
};
use up_provider_core::{
    accounts_to_value, BridgeError, ChannelEvent, ClientEvent, PersistedState, RpcErrorObject,
    RpcRequest, StateStore,
};

use common::{accounts_of, address, client_for, client_with, host, settle, Recorder};

#[tokio::test(start_paused = true)]
async fn account_change_reaches_the_client_exactly_once() {
    let (a, b, c) = (address(0xaa), address(0xbb), address(0xcc));
    let harness = host(42, vec![a, b]).await;
    let client = client_for(&harness.connector, "embedded");

    let accounts = client.request("eth_accounts").await.expect("accounts");
    assert_eq!(accounts_of(&accounts), vec![a, b]);
    assert_eq!(
        client.request("eth_chainId").await.expect("chain id"),
        json!("0x2a")
    );

    let recorder = Recorder::new();
    client.on(recorder.sink());
    settle().await;
    recorder.take();

    harness.connector.set_allowed_accounts(&[c]).expect("set accounts");
    settle().await;
    assert_eq!(recorder.events(), vec![ClientEvent::AccountsChanged(vec![c])]);
    assert_eq!(client.accounts(), vec![c]);

    harness
        .connector
        .set_allowed_accounts(&[c])
        .expect("same accounts");
    settle().await;
    assert_eq!(recorder.events().len(), 1, "unchanged lists are not pushed");
}

#[tokio::test(start_paused = true)]
async fn first_account_read_announces_connect() {
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_for(&harness.connector, "embedded");

    client.request("eth_accounts").await.expect("accounts");
    client.request("eth_accounts").await.expect("accounts again");

    let recorder = Recorder::new();
    client.on(recorder.sink());
    settle().await;

    let connects = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::Connect { .. }))
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test(start_paused = true)]
async fn forwarded_calls_resolve_and_clear_the_pending_table() {
    let harness = host(42, vec![address(0xaa)]).await;
    harness.upstream.respond("eth_getBalance", Ok(json!("0x10")));
    let client = client_for(&harness.connector, "embedded");

    let params = json!(["0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "latest"]);
    let balance = client
        .request(("eth_getBalance", params.clone()))
        .await
        .expect("balance");

    assert_eq!(balance, json!("0x10"));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(harness.upstream.last_params("eth_getBalance"), Some(params));
}

#[tokio::test(start_paused = true)]
async fn upstream_errors_are_annotated_with_the_request() {
    let harness = host(42, vec![address(0xaa)]).await;
    harness.upstream.respond(
        "eth_sendTransaction",
        Err(RpcErrorObject::new(4001, "User rejected the request.")),
    );
    let client = client_for(&harness.connector, "embedded");
    client.request("eth_chainId").await.expect("connect");

    let channel = harness.connector.channels().pop().expect("channel");
    let recorder = Recorder::new();
    channel.on(recorder.sink());

    let tx = json!([{
        "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "value": "0x1"
    }]);
    let err = client
        .request(("eth_sendTransaction", tx.clone()))
        .await
        .expect_err("rejected");
    match err {
        BridgeError::Upstream {
            code,
            message,
            method,
            params,
        } => {
            assert_eq!(code, 4001);
            assert_eq!(message, "User rejected the request.");
            assert_eq!(method, "eth_sendTransaction");
            assert_eq!(params, tx);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.pending_requests(), 0);

    settle().await;
    let sent: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ChannelEvent::SentTransaction(sent) => Some(sent),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, Some(address(0xaa)));
    assert_eq!(sent[0].to, Some(address(0xbb)));
    assert_eq!(sent[0].value, Some(json!("0x1")));
    assert_eq!(sent[0].error.as_ref().map(|e| e.code), Some(4001));
    assert!(sent[0].result.is_none());
}

struct CustomMethods;

#[async_trait]
impl RpcHandler for CustomMethods {
    async fn handle(&self, channel: &ClientChannel, request: &RpcRequest) -> Option<Outcome> {
        match request.method.as_str() {
            "up_import" => Some(Ok(json!({ "channel": channel.id() }))),
            "up_echoId" => Some(Ok(request.id.clone())),
            _ => None,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unsupported_methods_fall_through_the_handler_chain() {
    let harness = host(42, vec![address(0xaa)]).await;
    harness
        .connector
        .add_handler(Arc::new(CustomMethods))
        .expect("add handler");
    let client = client_for(&harness.connector, "embedded");

    let answered = client.request("up_import").await.expect("custom handler");
    let channel = harness.connector.channels().pop().expect("channel");
    assert_eq!(answered, json!({ "channel": channel.id() }));
    assert!(harness.upstream.calls().contains(&"up_import".to_owned()));

    let err = client
        .request("up_unknown")
        .await
        .expect_err("nobody handles it");
    match err {
        BridgeError::Upstream { code, method, .. } => {
            assert_eq!(code, -32601);
            assert_eq!(method, "up_unknown");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn handlers_see_ids_namespaced_by_channel() {
    let harness = host(42, vec![address(0xaa)]).await;
    harness
        .connector
        .add_handler(Arc::new(CustomMethods))
        .expect("add handler");
    let first = client_for(&harness.connector, "first");
    let second = client_for(&harness.connector, "second");

    let seen_first = first.request("up_echoId").await.expect("first echo");
    let seen_second = second.request("up_echoId").await.expect("second echo");

    let channel_of = |client: &str| {
        harness
            .connector
            .channels()
            .into_iter()
            .find(|c| c.origin().name() == client)
            .expect("channel")
    };
    let first_channel = channel_of("first");
    let second_channel = channel_of("second");
    let seen_first = seen_first.as_str().expect("namespaced id is a string");
    let seen_second = seen_second.as_str().expect("namespaced id is a string");
    assert!(seen_first.starts_with(&format!("{}:", first_channel.id())), "{seen_first}");
    assert!(seen_second.starts_with(&format!("{}:", second_channel.id())), "{seen_second}");
    assert_ne!(seen_first, seen_second, "equal client ids stay apart");
    assert_eq!(
        up_provider_core::strip_namespace(first_channel.id(), seen_first).expect("strip"),
        up_provider_core::strip_namespace(second_channel.id(), seen_second).expect("strip"),
    );
}

#[tokio::test(start_paused = true)]
async fn permission_grants_update_the_client_before_the_response() {
    let (a, c) = (address(0xaa), address(0xcc));
    let harness = host(42, vec![a]).await;
    harness.upstream.respond(
        "wallet_requestPermissions",
        Ok(json!([{ "parentCapability": "eth_accounts", "accounts": accounts_to_value(&[c]) }])),
    );
    let client = client_for(&harness.connector, "embedded");

    client
        .request(("wallet_requestPermissions", json!([{ "eth_accounts": {} }])))
        .await
        .expect("permissions");

    assert_eq!(client.accounts(), vec![c]);
    let channel = harness.connector.channels().pop().expect("channel");
    assert_eq!(channel.allowed_accounts(), vec![c]);
    assert_eq!(harness.connector.allowed_accounts(), vec![a]);
}

#[tokio::test(start_paused = true)]
async fn request_accounts_is_answered_by_the_host() {
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_for(&harness.connector, "embedded");
    client.request("eth_chainId").await.expect("connect");

    let channel = harness.connector.channels().pop().expect("channel");
    let recorder = Recorder::new();
    channel.on(recorder.sink());

    let accounts = client.request("eth_requestAccounts").await.expect("accounts");
    assert_eq!(accounts_of(&accounts), vec![address(0xaa)]);
    settle().await;

    assert!(recorder
        .events()
        .contains(&ChannelEvent::RequestAccounts(vec![address(0xaa)])));
    assert!(!harness
        .upstream
        .calls()
        .contains(&"eth_requestAccounts".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn accounts_alias_also_signals_an_account_request() {
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_for(&harness.connector, "embedded");
    client.request("eth_chainId").await.expect("connect");

    let channel = harness.connector.channels().pop().expect("channel");
    let recorder = Recorder::new();
    channel.on(recorder.sink());
    settle().await;
    recorder.take();

    let accounts = client.request("accounts").await.expect("accounts");
    assert_eq!(accounts_of(&accounts), vec![address(0xaa)]);
    settle().await;

    assert_eq!(
        recorder.events(),
        vec![ChannelEvent::RequestAccounts(vec![address(0xaa)])]
    );
    assert!(!harness.upstream.calls().contains(&"accounts".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn switch_chain_updates_every_client() {
    let harness = host(42, vec![address(0xaa)]).await;
    let first = client_for(&harness.connector, "first");
    let second = client_for(&harness.connector, "second");
    second.request("eth_chainId").await.expect("connect second");

    let result = first
        .request(("wallet_switchEthereumChain", json!([{ "chainId": "0x89" }])))
        .await
        .expect("switch");
    assert_eq!(result, Value::Null);
    settle().await;

    assert_eq!(harness.connector.chain_id(), 137);
    assert_eq!(first.chain_id(), 137);
    assert_eq!(second.chain_id(), 137);
    assert_eq!(
        second.request("eth_chainId").await.expect("chain id"),
        json!("0x89")
    );

    let err = first
        .request(("wallet_switchEthereumChain", json!([{}])))
        .await
        .expect_err("missing chain id");
    assert!(matches!(err, BridgeError::Upstream { code: -32602, .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn requests_accept_the_envelope_form() {
    let harness = host(42, vec![address(0xaa)]).await;
    harness.upstream.respond("eth_blockNumber", Ok(json!("0x100")));
    let client = client_for(&harness.connector, "embedded");

    let call: RpcCall =
        serde_json::from_value(json!({ "method": "eth_blockNumber" })).expect("envelope");
    assert_eq!(call.params, Value::Null);
    assert_eq!(client.request(call).await.expect("block"), json!("0x100"));

    let request = RpcRequest::new(json!(99), "eth_chainId", json!([]));
    assert_eq!(client.request(request).await.expect("chain"), json!("0x2a"));
}

#[tokio::test(start_paused = true)]
async fn persisted_state_warm_starts_the_client() {
    let store = Arc::new(MemoryStateStore::with_state(PersistedState {
        chain_id: Some(5),
        allowed_accounts: Some(vec![address(0x05)]),
        rpc_urls: None,
    }));
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_with(
        &harness.connector,
        "embedded",
        up_provider_adapters::BridgeConfig::default(),
        Some(store.clone()),
    );

    assert_eq!(client.chain_id(), 5);
    assert_eq!(client.accounts(), vec![address(0x05)]);
    assert!(client.is_connected());
    assert!(!client.has_channel());

    let recorder = Recorder::new();
    client.on(recorder.sink());
    client.request("eth_chainId").await.expect("connect");
    settle().await;

    assert_eq!(
        recorder.events(),
        vec![
            ClientEvent::ChainChanged(42),
            ClientEvent::AccountsChanged(vec![address(0xaa)]),
        ]
    );
    let saved = store.get().expect("store").expect("saved state");
    assert_eq!(saved.chain_id, Some(42));
    assert_eq!(saved.allowed_accounts, Some(vec![address(0xaa)]));
}

#[tokio::test(start_paused = true)]
async fn registered_providers_answer_every_providers_request() {
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_for(&harness.connector, "embedded");
    let bus = AnnouncementBus::default();
    let mut listener = bus.subscribe();

    let registration = bus.register(ProviderInfo::default(), client.clone());
    match listener.recv().await.expect("initial announcement") {
        BusMessage::Announce(announcement) => {
            assert_eq!(announcement.info.rdns, "dev.lukso.auth");
            assert_eq!(announcement.provider.context(), client.context());
        }
        other => panic!("unexpected message: {other:?}"),
    }

    bus.request_providers();
    assert!(matches!(
        listener.recv().await.expect("request echo"),
        BusMessage::RequestProviders
    ));
    assert!(matches!(
        listener.recv().await.expect("re-announcement"),
        BusMessage::Announce(_)
    ));

    registration.abort();
}
