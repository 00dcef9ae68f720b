//! Tests for channel subscriptions against an in-memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bsv_junglebus::{
    ChannelKind, ControlMessage, ErrorKind, JungleBusError, JungleBusSubscription, Protocol,
    StatusCode, SubscriptionError, SubscriptionHandlers, SubscriptionOptions, TransactionFetcher,
    TransactionRecord, Transport,
};
use common::MockTransport;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("sender dropped")
}

struct Recorders {
    handlers: SubscriptionHandlers,
    txs: mpsc::UnboundedReceiver<TransactionRecord>,
    statuses: mpsc::UnboundedReceiver<ControlMessage>,
    errors: mpsc::UnboundedReceiver<SubscriptionError>,
}

/// Handlers for publish, status, and errors that forward into channels.
fn recording_handlers() -> Recorders {
    let (tx_send, txs) = mpsc::unbounded_channel();
    let (status_send, statuses) = mpsc::unbounded_channel();
    let (error_send, errors) = mpsc::unbounded_channel();

    let handlers = SubscriptionHandlers::new()
        .on_publish(move |tx| {
            let tx_send = tx_send.clone();
            async move {
                let _ = tx_send.send(tx);
            }
        })
        .on_status(move |status| {
            let status_send = status_send.clone();
            async move {
                let _ = status_send.send(status);
            }
        })
        .on_error(move |err| {
            let _ = error_send.send(err);
        });

    Recorders {
        handlers,
        txs,
        statuses,
        errors,
    }
}

fn subscribe(
    transport: &Arc<MockTransport>,
    from_block: u64,
    handlers: SubscriptionHandlers,
) -> JungleBusSubscription {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    let options = SubscriptionOptions::default();
    JungleBusSubscription::new(transport, "abc", from_block, handlers, options).unwrap()
}

#[tokio::test]
async fn test_callbacks_decide_attached_channels() {
    let transport = MockTransport::new();
    let publish_only = subscribe(
        &transport,
        500,
        SubscriptionHandlers::new().on_publish(|_| async {}),
    );
    assert_eq!(transport.created(), vec!["query:abc:control", "query:abc:500"]);
    assert!(publish_only.data_subscribed());
    assert!(publish_only.control_subscribed());
    assert!(!publish_only.mempool_subscribed());
    assert_eq!(publish_only.channel(ChannelKind::Mempool), None);

    let transport = MockTransport::new();
    let mempool_only = subscribe(
        &transport,
        500,
        SubscriptionHandlers::new()
            .on_mempool(|_| async {})
            .on_status(|_| async {}),
    );
    assert_eq!(transport.created(), vec!["query:abc:mempool"]);
    assert!(mempool_only.mempool_subscribed());
    assert!(!mempool_only.data_subscribed());
    assert!(!mempool_only.control_subscribed());

    let transport = MockTransport::new();
    let _all = subscribe(
        &transport,
        0,
        SubscriptionHandlers::new()
            .on_publish(|_| async {})
            .on_mempool(|_| async {}),
    );
    assert_eq!(
        transport.created(),
        vec!["query:abc:mempool", "query:abc:control", "query:abc:0"]
    );
}

#[tokio::test]
async fn test_transactions_delivered_in_order() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let _sub = subscribe(&transport, 500, rec.handlers.clone());

    let data = transport.channel("query:abc:500");
    for (i, body) in ["AQID", "BAUG", ""].iter().enumerate() {
        data.publish_json(json!({
            "id": format!("tx{i}"),
            "block_hash": "00ab",
            "block_height": 500,
            "block_index": i,
            "transaction": body,
        }));
    }

    let first = recv(&mut rec.txs).await;
    assert_eq!(first.id, "tx0");
    assert_eq!(first.transaction, "010203");
    assert_eq!(first.block_height, 500);

    let second = recv(&mut rec.txs).await;
    assert_eq!(second.id, "tx1");
    assert_eq!(second.transaction, "040506");
    assert_eq!(second.block_index, 1);

    // no fetcher configured, delivered as published
    let third = recv(&mut rec.txs).await;
    assert_eq!(third.id, "tx2");
    assert_eq!(third.transaction, "");
    assert_eq!(third.merkle_proof, "");
}

#[tokio::test]
async fn test_block_done_advances_cursor() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    transport.channel("query:abc:control").publish_json(json!({
        "statusCode": 200,
        "status": "block-done",
        "block": 1000,
        "transactions": 12,
    }));

    assert_eq!(sub.current_block(), 1000);
    let status = recv(&mut rec.statuses).await;
    assert_eq!(status.status_code, StatusCode::BlockDone);
    assert_eq!(status.block, 1000);
    assert_eq!(status.transactions, 12);
}

#[tokio::test]
async fn test_stale_reconnect_resubscribes_once() {
    let transport = MockTransport::new();
    let rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    transport.channel("query:abc:control").publish_json(json!({
        "statusCode": 200,
        "status": "block-done",
        "block": 600,
    }));

    let stale = transport.channel("query:abc:500");
    stale.reconnecting();

    assert_eq!(
        transport.created(),
        vec!["query:abc:control", "query:abc:500", "query:abc:600"]
    );
    assert_eq!(stale.unsubscribe_calls(), 1);
    assert_eq!(stale.listener_count(), 0);
    assert_eq!(transport.removed(), vec!["query:abc:500"]);
    assert_eq!(sub.channel(ChannelKind::Data).as_deref(), Some("query:abc:600"));
    assert!(sub.data_subscribed());

    // a reconnect already at the cursor is left to the transport
    let fresh = transport.channel("query:abc:600");
    fresh.reconnecting();
    assert_eq!(transport.created().len(), 3);
    assert_eq!(fresh.unsubscribe_calls(), 0);
    assert!(!sub.data_subscribed());
}

#[tokio::test]
async fn test_events_from_replaced_handle_are_ignored() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let _sub = subscribe(&transport, 500, rec.handlers.clone());

    transport.channel("query:abc:control").publish_json(json!({
        "statusCode": 200,
        "block": 600,
    }));
    let _ = recv(&mut rec.statuses).await;

    let stale = transport.channel("query:abc:500");
    stale.reconnecting();

    // the replaced handle no longer delivers
    stale.publish_json(json!({"id": "late"}));
    transport
        .channel("query:abc:600")
        .publish_json(json!({"id": "current"}));

    assert_eq!(recv(&mut rec.txs).await.id, "current");
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let transport = MockTransport::new();
    let rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    sub.unsubscribe();
    sub.unsubscribe();

    let data = transport.channel("query:abc:500");
    let control = transport.channel("query:abc:control");
    assert_eq!(data.unsubscribe_calls(), 1);
    assert_eq!(control.unsubscribe_calls(), 1);
    assert_eq!(transport.removed().len(), 2);
    assert!(!sub.data_subscribed());
    assert!(!sub.control_subscribed());
    assert_eq!(sub.channel(ChannelKind::Data), None);
}

#[tokio::test]
async fn test_resubscribe_uses_current_block() {
    let transport = MockTransport::new();
    let rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    transport.channel("query:abc:control").publish_json(json!({
        "statusCode": 200,
        "block": 750,
    }));
    sub.subscribe().unwrap();

    assert_eq!(
        transport.created(),
        vec![
            "query:abc:control",
            "query:abc:500",
            "query:abc:control",
            "query:abc:750"
        ]
    );
    assert_eq!(transport.channel("query:abc:500").unsubscribe_calls(), 1);
    assert!(sub.data_subscribed());
}

#[tokio::test]
async fn test_server_error_reported_not_delivered() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    let control = transport.channel("query:abc:control");
    control.publish_json(json!({
        "statusCode": 101,
        "status": "bad request",
        "message": "",
    }));
    control.publish_json(json!({
        "statusCode": 100,
        "status": "waiting",
    }));

    let err = recv(&mut rec.errors).await;
    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.error_type, "bad request");
    assert_eq!(err.code, 101);
    assert_eq!(err.message, "bad request");
    assert_eq!(err.channel, "query:abc:control");
    assert_eq!(sub.last_error(), Some(err));

    // the error never reached the status queue
    let next = recv(&mut rec.statuses).await;
    assert_eq!(next.status_code, StatusCode::Waiting);
}

#[tokio::test]
async fn test_transport_error_sets_last_error() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());
    assert_eq!(sub.last_error(), None);

    transport
        .channel("query:abc:500")
        .fail("subscribe", 103, "permission denied");

    let err = recv(&mut rec.errors).await;
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(err.error_type, "subscribe");
    assert_eq!(err.code, 103);
    assert_eq!(sub.last_error().map(|e| e.message), Some("permission denied".to_string()));
}

#[tokio::test]
async fn test_decode_error_keeps_stream_attached() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let sub = subscribe(&transport, 500, rec.handlers.clone());

    let data = transport.channel("query:abc:500");
    data.publish_raw(b"not json".to_vec());
    data.publish_json(json!({"id": "ok"}));

    let err = recv(&mut rec.errors).await;
    assert_eq!(err.kind, ErrorKind::Decode);
    assert_eq!(err.channel, "query:abc:500");
    assert!(sub.data_subscribed());
    assert_eq!(recv(&mut rec.txs).await.id, "ok");
}

#[tokio::test]
async fn test_protobuf_publications() {
    use bsv_junglebus::codec::TransactionMessage;
    use prost::Message;

    let transport = MockTransport::new();
    let (send, mut rx) = mpsc::unbounded_channel();
    let handlers = SubscriptionHandlers::new().on_mempool(move |tx| {
        let send = send.clone();
        async move {
            let _ = send.send(tx);
        }
    });
    let dyn_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    let _sub = JungleBusSubscription::new(
        dyn_transport,
        "abc",
        0,
        handlers,
        SubscriptionOptions {
            protocol: Protocol::Protobuf,
            ..Default::default()
        },
    )
    .unwrap();

    let msg = TransactionMessage {
        id: "m1".to_string(),
        transaction: vec![0xde, 0xad],
        ..Default::default()
    };
    transport
        .channel("query:abc:mempool")
        .publish_raw(msg.encode_to_vec());

    let tx = recv(&mut rx).await;
    assert_eq!(tx.id, "m1");
    assert_eq!(tx.transaction, "dead");
    assert_eq!(tx.merkle_proof, "");
}

struct MapFetcher;

#[async_trait]
impl TransactionFetcher for MapFetcher {
    async fn fetch_transaction(&self, txid: &str) -> Result<Vec<u8>, JungleBusError> {
        match txid {
            "light" => Ok(vec![0x0a, 0x0b]),
            _ => Err(JungleBusError::NotFound),
        }
    }
}

#[tokio::test]
async fn test_missing_bodies_are_fetched() {
    let transport = MockTransport::new();
    let mut rec = recording_handlers();
    let dyn_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    let _sub = JungleBusSubscription::new(
        dyn_transport,
        "abc",
        500,
        rec.handlers.clone(),
        SubscriptionOptions {
            fetcher: Some(Arc::new(MapFetcher)),
            ..Default::default()
        },
    )
    .unwrap();

    let data = transport.channel("query:abc:500");
    data.publish_json(json!({"id": "light"}));
    data.publish_json(json!({"id": "gone"}));
    data.publish_json(json!({"id": "inline", "transaction": "/w=="}));

    let hydrated = recv(&mut rec.txs).await;
    assert_eq!(hydrated.id, "light");
    assert_eq!(hydrated.transaction, "0a0b");

    let err = recv(&mut rec.errors).await;
    assert_eq!(err.kind, ErrorKind::Fetch);
    assert_eq!(err.channel, "query:abc:500");

    // the failed entry is skipped, an inlined body is not refetched
    let inline = recv(&mut rec.txs).await;
    assert_eq!(inline.id, "inline");
    assert_eq!(inline.transaction, "ff");
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_pauses_once_and_resumes_once() {
    let transport = MockTransport::new();
    let gate = Arc::new(Semaphore::new(0));
    let (status_send, mut statuses) = mpsc::unbounded_channel();
    let (tx_send, mut txs) = mpsc::unbounded_channel();

    let handlers = {
        let gate = Arc::clone(&gate);
        SubscriptionHandlers::new()
            .on_publish(move |tx: TransactionRecord| {
                let gate = Arc::clone(&gate);
                let tx_send = tx_send.clone();
                async move {
                    let _permit = gate.acquire().await;
                    let _ = tx_send.send(tx.id);
                }
            })
            .on_status(move |status| {
                let status_send = status_send.clone();
                async move {
                    let _ = status_send.send(status);
                }
            })
    };
    let dyn_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    let sub = JungleBusSubscription::new(
        dyn_transport,
        "abc",
        500,
        handlers,
        SubscriptionOptions {
            max_queue_size: 3,
            pause_recheck_interval: Duration::from_secs(2),
            ..Default::default()
        },
    )
    .unwrap();

    let data = transport.channel("query:abc:500");
    for i in 0..8 {
        data.publish_json(json!({"id": format!("tx{i}")}));
    }

    assert!(sub.is_paused());
    assert_eq!(sub.queue_depth(), 8);
    assert_eq!(data.published(), vec![r#"{"cmd":"pause"}"#]);

    let paused = recv(&mut statuses).await;
    assert_eq!(paused.status_code, StatusCode::Paused);
    assert_eq!(paused.status_code.as_code(), 999);
    assert_eq!(paused.status, "paused subscription");

    // still behind after a recheck
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(sub.is_paused());
    assert_eq!(data.published().len(), 1);

    gate.add_permits(1);
    for i in 0..8 {
        assert_eq!(recv(&mut txs).await, format!("tx{i}"));
    }
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    assert!(!sub.is_paused());
    assert_eq!(
        data.published(),
        vec![r#"{"cmd":"pause"}"#, r#"{"cmd":"start"}"#]
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(data.published().len(), 2);
    assert!(statuses.try_recv().is_err());
}

#[tokio::test]
async fn test_drop_detaches_channels() {
    let transport = MockTransport::new();
    let sub = subscribe(
        &transport,
        500,
        SubscriptionHandlers::new().on_mempool(|_| async {}),
    );
    drop(sub);

    assert_eq!(transport.channel("query:abc:mempool").unsubscribe_calls(), 1);
    assert_eq!(transport.removed(), vec!["query:abc:mempool"]);
}

#[tokio::test]
async fn test_resubscribe_keeps_undelivered_records() {
    let transport = MockTransport::new();
    let gate = Arc::new(Semaphore::new(0));
    let (send, mut rx) = mpsc::unbounded_channel();
    let handlers = {
        let gate = Arc::clone(&gate);
        SubscriptionHandlers::new().on_mempool(move |tx: TransactionRecord| {
            let gate = Arc::clone(&gate);
            let send = send.clone();
            async move {
                let _permit = gate.acquire().await;
                let _ = send.send(tx.id);
            }
        })
    };
    let sub = subscribe(&transport, 0, handlers);

    let mempool = transport.channel("query:abc:mempool");
    for i in 0..3 {
        mempool.publish_json(json!({"id": format!("m{i}")}));
    }
    sub.subscribe().unwrap();
    assert_eq!(mempool.unsubscribe_calls(), 1);
    assert_eq!(transport.created().len(), 2);

    gate.add_permits(1);
    for i in 0..3 {
        assert_eq!(recv(&mut rx).await, format!("m{i}"));
    }
    assert!(sub.mempool_subscribed());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_while_paused_cancels_resume() {
    let transport = MockTransport::new();
    let gate = Arc::new(Semaphore::new(0));
    let handlers = {
        let gate = Arc::clone(&gate);
        SubscriptionHandlers::new().on_publish(move |_| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate.acquire().await;
            }
        })
    };
    let dyn_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    let sub = JungleBusSubscription::new(
        dyn_transport,
        "abc",
        500,
        handlers,
        SubscriptionOptions {
            max_queue_size: 2,
            ..Default::default()
        },
    )
    .unwrap();

    let data = transport.channel("query:abc:500");
    for i in 0..4 {
        data.publish_json(json!({"id": format!("tx{i}")}));
    }
    assert!(sub.is_paused());

    sub.unsubscribe();
    assert!(!sub.is_paused());
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(sub.queue_depth(), 0);
    assert_eq!(data.published(), vec![r#"{"cmd":"pause"}"#]);
}

#[test]
fn test_new_outside_runtime_is_an_error() {
    let transport: Arc<dyn Transport> = MockTransport::new();
    let result = JungleBusSubscription::new(
        Arc::clone(&transport),
        "abc",
        0,
        SubscriptionHandlers::new().on_mempool(|_| async {}),
        SubscriptionOptions::default(),
    );

    assert!(matches!(result, Err(JungleBusError::Runtime(_))));
}
