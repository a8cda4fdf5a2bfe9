// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use havencommon::{
    identifiers::{ConnectionId, UserId},
    protocol::{Envelope, Payload, Ping},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;

fn handle_for(
    hub: &Hub,
    user_id: &UserId,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = ConnectionHandle::new(
        ConnectionId::random(),
        user_id.clone(),
        tx,
        hub.shutdown_token().child_token(),
    );
    (handle, rx)
}

fn ping(ts: i64) -> Envelope {
    Envelope::push(Payload::Ping(Ping { ts }))
}

#[tokio::test]
async fn count_tracks_registrations_under_concurrency() {
    let hub = Arc::new(Hub::new());
    let user_id = UserId::random();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let hub = hub.clone();
        let user_id = user_id.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, _rx) = {
                let (tx, rx) = mpsc::channel(4);
                (
                    ConnectionHandle::new(
                        ConnectionId::random(),
                        user_id,
                        tx,
                        CancellationToken::new(),
                    ),
                    rx,
                )
            };
            let connection_id = handle.connection_id().clone();
            let owner = handle.user_id().clone();
            hub.register(handle).await;
            (owner, connection_id)
        }));
    }

    let mut registered = Vec::new();
    for task in tasks {
        registered.push(task.await.expect("registration task failed"));
    }
    assert_eq!(hub.count().await, 32);

    for (user, connection) in &registered[..16] {
        hub.unregister(user, connection).await;
    }
    assert_eq!(hub.count().await, 16);

    // Unregistering twice changes nothing.
    for (user, connection) in &registered[..16] {
        hub.unregister(user, connection).await;
    }
    assert_eq!(hub.count().await, 16);
}

#[tokio::test]
async fn fan_out_reaches_every_connection_of_the_user() {
    let hub = Hub::new();
    let alice = UserId::random();
    let bob = UserId::random();

    let (handle_a, mut rx_a) = handle_for(&hub, &alice, 8);
    let (handle_b, mut rx_b) = handle_for(&hub, &alice, 8);
    let (handle_c, mut rx_c) = handle_for(&hub, &bob, 8);
    hub.register(handle_a).await;
    hub.register(handle_b).await;
    hub.register(handle_c).await;

    assert_eq!(hub.send_to_user(&alice, &ping(1)).await, 2);
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_ok());
    // Bob's device saw nothing.
    assert!(rx_c.try_recv().is_err());

    assert_eq!(
        hub.send_to_users(&[alice.clone(), bob.clone()], &ping(2)).await,
        3
    );
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_ok());
    assert!(rx_c.try_recv().is_ok());

    // Sending to a user with no connections delivers nowhere.
    assert_eq!(hub.send_to_user(&UserId::random(), &ping(3)).await, 0);
}

#[tokio::test]
async fn enqueue_preserves_order_per_connection() {
    let hub = Hub::new();
    let alice = UserId::random();
    let (handle, mut rx) = handle_for(&hub, &alice, 16);
    hub.register(handle).await;

    for ts in 0..10 {
        hub.send_to_user(&alice, &ping(ts)).await;
    }
    for expected in 0..10 {
        let envelope = rx.try_recv().expect("missing envelope");
        let Payload::Ping(ping) = envelope.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(ping.ts, expected);
    }
}

#[tokio::test]
async fn queue_overflow_closes_the_slow_consumer_without_blocking() {
    let hub = Hub::new();
    let alice = UserId::random();
    // A queue of two and a reader that never drains it.
    let (handle, _rx) = handle_for(&hub, &alice, 2);
    let cancelled = handle.clone();
    hub.register(handle).await;

    assert_eq!(hub.send_to_user(&alice, &ping(1)).await, 1);
    assert_eq!(hub.send_to_user(&alice, &ping(2)).await, 1);
    // Third enqueue overflows: the send returns immediately and the
    // connection is marked for teardown.
    assert_eq!(hub.send_to_user(&alice, &ping(3)).await, 0);
    assert!(cancelled.is_closed());
}

#[tokio::test]
async fn stop_cancels_every_connection() {
    let hub = Hub::new();
    let alice = UserId::random();
    let bob = UserId::random();
    let (handle_a, _rx_a) = handle_for(&hub, &alice, 4);
    let (handle_b, _rx_b) = handle_for(&hub, &bob, 4);
    let watch_a = handle_a.clone();
    let watch_b = handle_b.clone();
    hub.register(handle_a).await;
    hub.register(handle_b).await;

    hub.stop().await;
    assert!(watch_a.is_closed());
    assert!(watch_b.is_closed());
    assert_eq!(hub.count().await, 0);

    // Registration after shutdown is refused.
    let (handle_c, _rx_c) = handle_for(&hub, &alice, 4);
    let watch_c = handle_c.clone();
    hub.register(handle_c).await;
    assert_eq!(hub.count().await, 0);
    assert!(watch_c.is_closed());
}
