//! End-to-end flows: real server, real client sessions.

use std::net::SocketAddr;
use std::time::Duration;

use chat_client::{ClientError, ClientSession, Destination};
use chat_core::{Category, ClientRequest, ServerMessage};
use chat_protocol::{decode_reply, encode_request};
use chat_server::config::Config;
use chat_server::server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    start_server_with_capacity(16).await
}

async fn start_server_with_capacity(max_clients: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config {
        bind_addr: addr.ip().to_string(),
        port: addr.port(),
        max_clients,
    };
    tokio::spawn(async move {
        let _ = server::run_with_listener(listener, config, CancellationToken::new()).await;
    });
    addr
}

async fn connect_and_login(addr: SocketAddr, username: &str) -> (ClientSession, u32) {
    let session = ClientSession::connect(&addr.ip().to_string(), addr.port(), username)
        .await
        .expect("connect");
    let id = timeout(TICK, session.login()).await.unwrap().expect("login");
    (session, id)
}

#[tokio::test]
async fn login_assigns_distinct_ids_and_lists_users() {
    let addr = start_server().await;

    let (alice, alice_id) = connect_and_login(addr, "alice").await;
    let (_bob, bob_id) = connect_and_login(addr, "bob").await;
    assert_ne!(alice_id, bob_id);

    let users = timeout(TICK, alice.request_connected_users())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users["alice"].id, alice_id);
    assert_eq!(users["bob"].id, bob_id);
    assert_eq!(users["bob"].status, "online");
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let addr = start_server().await;

    let (_alice, _) = connect_and_login(addr, "alice").await;

    let imposter = ClientSession::connect(&addr.ip().to_string(), addr.port(), "alice")
        .await
        .unwrap();
    match timeout(TICK, imposter.login()).await.unwrap() {
        Err(ClientError::Server(msg)) => assert!(msg.contains("already registered")),
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(imposter.user_id(), None);
    assert!(imposter.last_error().is_some());
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
    let addr = start_server().await;

    let (alice, alice_id) = connect_and_login(addr, "alice").await;
    let (bob, _) = connect_and_login(addr, "bob").await;
    let (carol, _) = connect_and_login(addr, "carol").await;

    let status = timeout(TICK, alice.broadcast("hello, room"))
        .await
        .unwrap()
        .unwrap();
    assert!(status.contains("2"), "expected 2 deliveries, got '{status}'");

    for receiver in [&bob, &carol] {
        let msg = timeout(TICK, receiver.next_message(Category::Broadcast))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.from_id, alice_id);
        assert_eq!(msg.from_username, "alice");
        assert_eq!(msg.body, "hello, room");
        assert!(receiver.try_pop_message(Category::Broadcast).is_none());
    }

    // Self-exclusion: the sender's queue stays empty.
    assert!(alice.try_pop_message(Category::Broadcast).is_none());
}

#[tokio::test]
async fn direct_message_by_name_and_by_id() {
    let addr = start_server().await;

    let (alice, alice_id) = connect_and_login(addr, "alice").await;
    let (bob, bob_id) = connect_and_login(addr, "bob").await;

    timeout(TICK, alice.direct_message("by name", Destination::Name("bob".into())))
        .await
        .unwrap()
        .unwrap();
    timeout(TICK, alice.direct_message("by id", Destination::Id(bob_id)))
        .await
        .unwrap()
        .unwrap();

    for expected in ["by name", "by id"] {
        let msg = timeout(TICK, bob.next_message(Category::Direct))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.from_id, alice_id);
        assert_eq!(msg.body, expected);
    }
    assert!(bob.try_pop_message(Category::Direct).is_none());
    assert!(alice.try_pop_message(Category::Direct).is_none());
}

#[tokio::test]
async fn direct_message_to_unknown_user_is_an_error() {
    let addr = start_server().await;

    let (alice, _) = connect_and_login(addr, "alice").await;
    let (bob, _) = connect_and_login(addr, "bob").await;

    match timeout(TICK, alice.direct_message("hello?", Destination::Name("ghost".into())))
        .await
        .unwrap()
    {
        Err(ClientError::Server(msg)) => assert!(msg.contains("ghost")),
        other => panic!("expected server error, got {:?}", other),
    }
    assert!(alice.last_error().is_some());

    // Nobody got a notification out of it.
    sleep(Duration::from_millis(100)).await;
    assert!(bob.try_pop_message(Category::Direct).is_none());
    assert!(alice.try_pop_message(Category::Direct).is_none());
}

#[tokio::test]
async fn change_status_is_stored_and_visible() {
    let addr = start_server().await;

    let (alice, _) = connect_and_login(addr, "alice").await;
    let (bob, _) = connect_and_login(addr, "bob").await;

    let echoed = timeout(TICK, alice.change_status("away"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, "away");

    let users = timeout(TICK, bob.request_connected_users())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(users["alice"].status, "away");
}

#[tokio::test]
async fn requests_before_synchronize_are_refused() {
    let addr = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = ClientRequest::Broadcast(chat_core::BroadcastRequest {
        text: "too early".into(),
    });
    let mut payload = Vec::new();
    encode_request(&request, &mut payload).unwrap();
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&payload).await.unwrap();

    let mut len_buf = [0u8; 4];
    timeout(TICK, stream.read_exact(&mut len_buf)).await.unwrap().unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    timeout(TICK, stream.read_exact(&mut body)).await.unwrap().unwrap();

    match decode_reply(&body).unwrap() {
        ServerMessage::Error(e) => assert!(e.message.contains("synchronize")),
        other => panic!("expected error reply, got {:?}", other),
    }
}

#[tokio::test]
async fn disconnect_removes_user_from_registry() {
    let addr = start_server().await;

    let (alice, _) = connect_and_login(addr, "alice").await;
    let (bob, _) = connect_and_login(addr, "bob").await;

    alice.stop_session().await;

    // Removal happens when the server notices the EOF; poll for it.
    let mut remaining = usize::MAX;
    for _ in 0..50 {
        let users = timeout(TICK, bob.request_connected_users())
            .await
            .unwrap()
            .unwrap();
        remaining = users.len();
        if remaining == 1 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(remaining, 1);

    // The name is free again.
    let (alice2, _) = connect_and_login(addr, "alice").await;
    assert_eq!(alice2.username(), "alice");
}

#[tokio::test]
async fn capacity_gate_drops_extra_connections() {
    let addr = start_server_with_capacity(1).await;

    let (_alice, _) = connect_and_login(addr, "alice").await;

    // The second connection is accepted at TCP level but dropped before
    // the handshake, so login never completes.
    let bob = ClientSession::connect(&addr.ip().to_string(), addr.port(), "bob").await;
    if let Ok(session) = bob {
        match timeout(TICK, session.login()).await.unwrap() {
            Err(_) => {}
            Ok(id) => panic!("expected login to fail over capacity, got id {id}"),
        }
    }
}
