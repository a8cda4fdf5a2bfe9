// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests over a real TCP connection: framing, the pre-auth state
//! machine, session resume, messaging and offline delivery.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use havenbackend::{
    auth::AuthService,
    hub::Hub,
    settings::{ApplicationSettings, AuthSettings, DatabaseSettings, LimitSettings, Settings},
    store::{Store, UserRecord},
};
use havencommon::protocol::{
    AuthRequest, Envelope, GroupCreate, MessageAck, MessageSend, Payload, Ping, RequestId,
    error_codes,
};
use havencommon::protocol::{DeliveryStatus, MessageKind};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

struct TestServer {
    addr: SocketAddr,
    store: Store,
    auth: AuthService,
    hub: Arc<Hub>,
    _dir: tempfile::TempDir,
}

fn test_settings(db_path: String, limits: LimitSettings) -> Settings {
    Settings {
        application: ApplicationSettings {
            server_name: "haven-test".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 0,
        },
        database: DatabaseSettings { path: db_path },
        auth: AuthSettings {
            rp_id: "localhost".to_owned(),
            rp_display_name: "Haven Test".to_owned(),
            rp_origins: vec!["http://localhost:8080".to_owned()],
            session_lifetime_secs: 3600,
            registration_challenge_ttl_secs: 60,
            login_challenge_ttl_secs: 30,
            key_package_lifetime_secs: 3600,
        },
        limits,
    }
}

async fn spawn_server(limits: LimitSettings) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("haven-test.db");
    let settings = test_settings(db_path.to_string_lossy().into_owned(), limits);

    let store = Store::open(&db_path).await.expect("store open failed");
    let auth = AuthService::new(store.clone(), settings.auth.clone()).expect("auth setup failed");
    let hub = Arc::new(Hub::new());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr");

    let run_store = store.clone();
    let run_auth = auth.clone();
    let run_hub = hub.clone();
    tokio::spawn(async move {
        havenserver::run(listener, run_store, run_auth, run_hub, settings)
            .await
            .expect("server run failed");
    });

    TestServer {
        addr,
        store,
        auth,
        hub,
        _dir: dir,
    }
}

struct Client {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        // The client side allows larger frames so the oversize test can
        // actually put one on the wire.
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(1 << 20)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
        }
    }

    async fn send(&mut self, envelope: &Envelope) {
        let bytes = envelope.encode().expect("encode failed");
        self.framed
            .send(Bytes::from(bytes))
            .await
            .expect("send failed");
    }

    async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.framed
            .send(Bytes::from(bytes))
            .await
            .expect("send failed");
    }

    /// Next decoded envelope, or None once the server closed the
    /// connection (a reset counts as closed).
    async fn recv(&mut self) -> Option<Envelope> {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a frame")?;
        match frame {
            Ok(bytes) => Some(Envelope::decode(&bytes).expect("undecodable frame")),
            Err(_) => None,
        }
    }

    async fn authenticate(&mut self, server: &TestServer, user: &UserRecord) {
        let token = server
            .auth
            .issue_session(&user.id, None)
            .await
            .expect("session issue failed");
        self.send(&Envelope::response(
            RequestId::new(b"auth".to_vec()).unwrap(),
            Payload::AuthRequest(AuthRequest {
                username: None,
                session_token: Some(token.into_string()),
            }),
        ))
        .await;
        let reply = self.recv().await.expect("connection closed during auth");
        let Payload::AuthSuccess(success) = reply.payload else {
            panic!("expected AuthSuccess, got {:?}", reply.payload);
        };
        assert_eq!(success.user_id, user.id);
        // A resume issues no fresh token.
        assert!(success.session_token.is_none());
    }
}

fn request(id: &[u8], payload: Payload) -> Envelope {
    Envelope::response(RequestId::new(id.to_vec()).unwrap(), payload)
}

#[tokio::test]
async fn ping_pong_before_authentication() {
    let server = spawn_server(LimitSettings::default()).await;
    let mut client = Client::connect(server.addr).await;

    client
        .send(&request(b"p1", Payload::Ping(Ping { ts: 42 })))
        .await;
    let reply = client.recv().await.expect("connection closed");
    assert_eq!(reply.request_id.as_bytes(), b"p1");
    let Payload::Pong(pong) = reply.payload else {
        panic!("expected a pong");
    };
    assert_eq!(pong.ts, 42);
}

#[tokio::test]
async fn pre_auth_violation_is_fatal() {
    let server = spawn_server(LimitSettings::default()).await;
    let alice = server.store.create_user("alice", "Alice").await.unwrap();
    let conversation = server
        .store
        .create_conversation("team", &alice.id, &[])
        .await
        .unwrap();

    let mut client = Client::connect(server.addr).await;
    client
        .send(&request(
            b"m1",
            Payload::MessageSend(MessageSend {
                conversation_id: conversation.id,
                payload: vec![1],
                message_type: MessageKind::Application,
                epoch: 0,
            }),
        ))
        .await;

    let reply = client.recv().await.expect("expected an error before close");
    let Payload::Error(body) = reply.payload else {
        panic!("expected an error envelope");
    };
    assert_eq!(body.code, error_codes::INVALID_PAYLOAD);
    assert!(body.fatal);

    // The server closes the connection after a fatal error.
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn oversize_frames_close_the_connection() {
    let server = spawn_server(LimitSettings::default()).await;
    let mut client = Client::connect(server.addr).await;

    // Well above the 64 KiB envelope bound.
    client.send_raw(vec![0u8; 128 * 1024]).await;
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn unauthenticated_connections_are_dropped_at_the_deadline() {
    let limits = LimitSettings {
        auth_deadline_secs: 1,
        ..LimitSettings::default()
    };
    let server = spawn_server(limits).await;
    let mut client = Client::connect(server.addr).await;

    // No auth envelope: the server closes the connection after a second.
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn resume_group_create_and_message_round_trip() {
    let server = spawn_server(LimitSettings::default()).await;
    let alice = server.store.create_user("alice", "Alice").await.unwrap();
    let bob = server.store.create_user("bob", "Bob").await.unwrap();

    let mut alice_client = Client::connect(server.addr).await;
    alice_client.authenticate(&server, &alice).await;
    assert_eq!(server.hub.count().await, 1);

    // Create a group with bob.
    alice_client
        .send(&request(
            b"g1",
            Payload::GroupCreate(GroupCreate {
                title: "team".to_owned(),
                member_ids: vec![bob.id.clone()],
            }),
        ))
        .await;
    let reply = alice_client.recv().await.expect("connection closed");
    assert_eq!(reply.request_id.as_bytes(), b"g1");
    let Payload::GroupCreated(created) = reply.payload else {
        panic!("expected GroupCreated");
    };

    // Send a message while bob is offline.
    alice_client
        .send(&request(
            b"m1",
            Payload::MessageSend(MessageSend {
                conversation_id: created.conversation_id.clone(),
                payload: b"ciphertext".to_vec(),
                message_type: MessageKind::Application,
                epoch: 0,
            }),
        ))
        .await;
    let echo = alice_client.recv().await.expect("connection closed");
    assert_eq!(echo.request_id.as_bytes(), b"m1");
    let Payload::MessageReceive(echoed) = echo.payload else {
        panic!("expected the message echo");
    };
    assert_eq!(echoed.payload, b"ciphertext".to_vec());

    // Bob connects: the pending message is flushed right after auth.
    let mut bob_client = Client::connect(server.addr).await;
    bob_client.authenticate(&server, &bob).await;
    // Skip the group notification timing: the flush push is identifiable by
    // its type.
    let mut flushed = None;
    for _ in 0..3 {
        let Some(envelope) = bob_client.recv().await else {
            break;
        };
        if let Payload::MessageReceive(received) = envelope.payload {
            flushed = Some(received);
            break;
        }
    }
    let flushed = flushed.expect("pending message was not flushed");
    assert_eq!(flushed.message_id, echoed.message_id);
    assert_eq!(flushed.payload, b"ciphertext".to_vec());

    // Bob acknowledges; alice is notified.
    bob_client
        .send(&request(
            b"a1",
            Payload::MessageAck(MessageAck {
                message_id: flushed.message_id.clone(),
                status: DeliveryStatus::Delivered,
            }),
        ))
        .await;
    let mut delivered = None;
    for _ in 0..3 {
        let Some(envelope) = alice_client.recv().await else {
            break;
        };
        if let Payload::MessageDelivered(body) = envelope.payload {
            delivered = Some(body);
            break;
        }
    }
    let delivered = delivered.expect("no delivery notification");
    assert_eq!(delivered.message_id, flushed.message_id);
    assert_eq!(delivered.delivered_to, bob.id);
}
