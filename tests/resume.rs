//! Session resume: persisted in-flight state replayed across Starts.

mod common;

use common::TestBroker;
use photon::protocol::{ControlPacket, PublishPacket, Qos};
use photon::{Client, ClientOptions, MemoryStore, Store};
use std::sync::Arc;
use std::time::Duration;

fn options(url: &str, store: &Arc<MemoryStore>) -> ClientOptions {
    ClientOptions::new("resume-tester")
        .add_server(url)
        .with_keep_alive(0)
        .with_clean_session(false)
        .with_store(Arc::clone(store) as Arc<dyn Store>)
}

#[tokio::test]
async fn resume_mid_qos2_replays_pubrel_not_publish() {
    let broker = TestBroker::listen().await;
    let url = broker.url.clone();
    let store = Arc::new(MemoryStore::new());

    // A crash after PUBREC left o:7 in the awaiting-PUBCOMP phase, which
    // is persisted as the PUBREL frame.
    store
        .put("o:7", &ControlPacket::PubRel(7).encode())
        .unwrap();

    let broker_task = tokio::spawn(async move {
        let mut session = broker.accept_session(0).await;
        assert_eq!(session.recv().await, ControlPacket::PubRel(7));
        session.send(ControlPacket::PubComp(7)).await;
        assert_eq!(session.recv().await, ControlPacket::Disconnect);
    });

    let mut client = Client::new(options(&url, &store));
    let mut resumed = client.start().await.unwrap();
    assert_eq!(resumed.len(), 1);

    resumed.pop().unwrap().wait().await.unwrap();
    assert!(store.all().unwrap().is_empty());

    client.disconnect(Duration::from_millis(500)).await;
    broker_task.await.unwrap();
}

#[tokio::test]
async fn resumed_pubrel_beats_an_immediate_disconnect() {
    let broker = TestBroker::listen().await;
    let url = broker.url.clone();
    let store = Arc::new(MemoryStore::new());
    store
        .put("o:9", &ControlPacket::PubRel(9).encode())
        .unwrap();

    let broker_task = tokio::spawn(async move {
        let mut session = broker.accept_session(0).await;
        // The replayed PUBREL must hit the wire ahead of the DISCONNECT
        // even when the caller tears the session down right after Start.
        assert_eq!(session.recv().await, ControlPacket::PubRel(9));
        assert_eq!(session.recv().await, ControlPacket::Disconnect);
    });

    let mut client = Client::new(options(&url, &store));
    let resumed = client.start().await.unwrap();
    assert_eq!(resumed.len(), 1);
    client.disconnect(Duration::ZERO).await;

    broker_task.await.unwrap();
    // No PUBCOMP arrived before shutdown, so the receipt reports the
    // cancellation instead of completing.
    for receipt in resumed {
        assert!(receipt.wait().await.is_err());
    }
    // The in-flight record stays put for the next session.
    assert_eq!(store.all().unwrap(), vec!["o:9".to_string()]);
}

#[tokio::test]
async fn interrupted_qos1_publish_is_retransmitted_with_dup() {
    let broker = TestBroker::listen().await;
    let url = broker.url.clone();
    let store = Arc::new(MemoryStore::new());
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

    let broker_task = tokio::spawn(async move {
        // First session: the publish goes out, the broker never acks it.
        let mut session = broker.accept_session(0).await;
        let publish = session.recv_publish().await;
        assert!(!publish.dup);
        let first_id = publish.packet_id.unwrap();
        seen_tx.send(first_id).unwrap();

        // Second session: the same message returns with DUP=1 and the
        // same packet identifier.
        let mut session = broker.accept_session(0).await;
        let publish = session.recv_publish().await;
        assert!(publish.dup);
        assert_eq!(publish.packet_id, Some(first_id));
        assert_eq!(publish.payload, b"critical");
        session.send(ControlPacket::PubAck(first_id)).await;
    });

    let mut client = Client::new(options(&url, &store));
    client.start().await.unwrap();
    let receipt = client.publish(Qos::AtLeastOnce, "alerts", "critical").await;
    // Wait until the broker has consumed the frame, then die unacked.
    seen_rx.await.unwrap();
    client.force_disconnect().await;
    assert!(receipt.wait().await.is_err());
    assert_eq!(store.all().unwrap().len(), 1);

    let mut client = Client::new(options(&url, &store));
    let mut resumed = client.start().await.unwrap();
    assert_eq!(resumed.len(), 1);
    resumed.pop().unwrap().wait().await.unwrap();
    assert!(store.all().unwrap().is_empty());

    client.force_disconnect().await;
    broker_task.await.unwrap();
}

#[tokio::test]
async fn clean_session_wipes_persisted_state() {
    let broker = TestBroker::listen().await;
    let url = broker.url.clone();
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            "o:3",
            &ControlPacket::Publish(PublishPacket {
                topic: "stale".into(),
                payload: b"old".to_vec(),
                qos: Qos::AtLeastOnce,
                packet_id: Some(3),
                dup: false,
                retain: false,
            })
            .encode(),
        )
        .unwrap();

    let broker_task = tokio::spawn(async move {
        let _session = broker.accept_session(0).await;
        // Nothing must be replayed; just hold the session open briefly.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut client = Client::new(
        ClientOptions::new("clean-tester")
            .add_server(&url)
            .with_keep_alive(0)
            .with_clean_session(true)
            .with_store(Arc::clone(&store) as Arc<dyn Store>),
    );
    let resumed = client.start().await.unwrap();
    assert!(resumed.is_empty());
    assert!(store.all().unwrap().is_empty());

    client.force_disconnect().await;
    broker_task.await.unwrap();
}
