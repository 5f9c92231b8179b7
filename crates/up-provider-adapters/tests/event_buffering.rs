mod common;

use std::time::Duration;

use up_provider_adapters::EventQueue;
use up_provider_core::ClientEvent;

use common::{address, client_for, host, Recorder};

#[tokio::test(start_paused = true)]
async fn events_before_first_listener_replay_in_order_after_delay() {
    let queue = EventQueue::new(Duration::from_millis(100));
    for n in 1..=5u32 {
        assert!(!queue.emit(n), "no listener yet, event must be buffered");
    }

    let recorder = Recorder::new();
    queue.subscribe(recorder.sink());
    assert!(recorder.events().is_empty(), "replay waits for the resume delay");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.events(), vec![1, 2, 3, 4, 5]);

    assert!(queue.emit(6));
    assert_eq!(recorder.events(), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test(start_paused = true)]
async fn listeners_attached_in_the_same_tick_all_see_the_replay() {
    let queue = EventQueue::new(Duration::from_millis(100));
    queue.emit("a");
    queue.emit("b");

    let first = Recorder::new();
    let second = Recorder::new();
    queue.subscribe(first.sink());
    queue.subscribe(second.sink());
    assert_eq!(queue.listener_count(), 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(first.events(), vec!["a", "b"]);
    assert_eq!(second.events(), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn emissions_during_the_resume_delay_keep_their_place() {
    let queue = EventQueue::new(Duration::from_millis(100));
    queue.emit(1u8);
    let recorder = Recorder::new();
    queue.subscribe(recorder.sink());
    assert!(!queue.is_buffering());
    assert!(!queue.emit(2), "still flushing, must queue behind 1");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.events(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_listener_stops_receiving() {
    let queue = EventQueue::new(Duration::ZERO);
    let recorder = Recorder::new();
    let id = queue.subscribe(recorder.sink());
    tokio::time::sleep(Duration::from_millis(1)).await;

    queue.emit(1u8);
    assert!(queue.unsubscribe(id));
    assert!(!queue.unsubscribe(id));
    queue.emit(2u8);
    assert_eq!(recorder.events(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn client_replays_handshake_changes_to_a_late_listener() {
    let harness = host(42, vec![address(0xaa)]).await;
    let client = client_for(&harness.connector, "embedded");

    client.request("eth_chainId").await.expect("chain id");
    tokio::time::sleep(Duration::from_secs(5)).await;

    let recorder = Recorder::new();
    client.on(recorder.sink());
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        recorder.events(),
        vec![
            ClientEvent::ChainChanged(42),
            ClientEvent::AccountsChanged(vec![address(0xaa)]),
        ]
    );
}
