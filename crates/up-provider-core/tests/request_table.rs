use serde_json::json;

use up_provider_core::{namespace_id, request_key, strip_namespace, BridgeError, RequestTable};

#[tokio::test]
async fn resolve_delivers_result_and_cleans_up() {
    let table = RequestTable::default();
    let key = request_key(&json!(7));
    let rx = table
        .register(&key, "eth_blockNumber", json!([]))
        .expect("register");
    table.mark_sent(&key).expect("mark sent");
    assert_eq!(table.len(), 1);

    assert!(table.resolve(&key, json!("0x10")).expect("resolve"));
    let result = rx.await.expect("completion").expect("ok result");
    assert_eq!(result, json!("0x10"));
    assert!(table.is_empty());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let table = RequestTable::default();
    let _rx = table.register("1", "eth_call", json!([])).expect("first");
    let err = table
        .register("1", "eth_call", json!([]))
        .expect_err("second must fail");
    assert!(err.to_string().contains("already pending"));
}

#[test]
fn unknown_ids_are_a_no_op() {
    let table = RequestTable::default();
    assert!(!table.resolve("missing", json!(null)).expect("resolve"));
    assert!(!table
        .reject("missing", BridgeError::Transport("x".to_owned()))
        .expect("reject"));
}

#[tokio::test]
async fn reject_all_fails_every_waiter() {
    let table = RequestTable::default();
    let rx_a = table.register("1", "eth_call", json!([])).expect("a");
    let rx_b = table.register("2", "eth_call", json!([])).expect("b");

    let closed = BridgeError::TransportClosed("host gone".to_owned());
    assert_eq!(table.reject_all(&closed).expect("reject all"), 2);
    assert!(rx_a.await.expect("a done").expect_err("a").is_transport_closed());
    assert!(rx_b.await.expect("b done").expect_err("b").is_transport_closed());
    assert!(table.is_empty());
}

#[test]
fn namespaced_ids_round_trip_per_channel() {
    let namespaced = namespace_id("chan-1", &json!(42));
    assert_eq!(namespaced, "chan-1:42");
    assert_eq!(strip_namespace("chan-1", &namespaced).expect("strip"), json!(42));

    let string_id = namespace_id("chan-1", &json!("abc"));
    assert_eq!(strip_namespace("chan-1", &string_id).expect("strip"), json!("abc"));

    assert!(strip_namespace("chan-2", &namespaced).is_err());
}
