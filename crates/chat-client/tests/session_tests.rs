//! Session behavior against a scripted peer.
//!
//! Each test binds a listener on port 0 and plays the server side of
//! the protocol by hand, so the session's handshake, demultiplexing
//! and shutdown paths are exercised without a real server.

use std::sync::Arc;
use std::time::Duration;

use chat_client::{ClientError, ClientSession, Destination};
use chat_core::{Category, ClientRequest, ConnectedUser, ConnectedUsersResponse, ServerMessage};
use chat_protocol::{decode_request, encode_reply};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const TICK: Duration = Duration::from_secs(5);

async fn read_request(stream: &mut TcpStream) -> ClientRequest {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read length");
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.expect("read body");
    decode_request(&body).expect("decode request")
}

async fn send_reply(stream: &mut TcpStream, msg: &ServerMessage) {
    let mut payload = Vec::new();
    encode_reply(msg, &mut payload).expect("encode reply");
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .expect("write length");
    stream.write_all(&payload).await.expect("write body");
}

async fn bind_script() -> (TcpListener, String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn login_assigns_user_id_and_acknowledges() {
    let (listener, host, port) = bind_script().await;

    let script = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        match read_request(&mut stream).await {
            ClientRequest::Synchronize(sync) => assert_eq!(sync.username, "alice"),
            other => panic!("expected synchronize, got {:?}", other),
        }
        send_reply(&mut stream, &ServerMessage::my_info(42)).await;

        match read_request(&mut stream).await {
            ClientRequest::Acknowledge(ack) => assert_eq!(ack.user_id, 42),
            other => panic!("expected acknowledge, got {:?}", other),
        }
    });

    let session = ClientSession::connect(&host, port, "alice").await.unwrap();
    assert_eq!(session.user_id(), None);

    let id = timeout(TICK, session.login()).await.unwrap().unwrap();
    assert_eq!(id, 42);
    assert_eq!(session.user_id(), Some(42));

    timeout(TICK, script).await.unwrap().unwrap();
}

#[tokio::test]
async fn login_error_is_surfaced_and_queued() {
    let (listener, host, port) = bind_script().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut stream).await;
        send_reply(&mut stream, &ServerMessage::error("duplicate")).await;
        // Keep the socket open so shutdown is the client's decision.
        tokio::time::sleep(TICK).await;
    });

    let session = ClientSession::connect(&host, port, "alice").await.unwrap();
    match timeout(TICK, session.login()).await.unwrap() {
        Err(ClientError::Server(msg)) => assert_eq!(msg, "duplicate"),
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(session.user_id(), None);
    assert_eq!(session.last_error().as_deref(), Some("duplicate"));
    assert_eq!(session.last_error(), None);
}

#[tokio::test]
async fn pushes_interleaved_with_a_reply_are_demultiplexed() {
    let (listener, host, port) = bind_script().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut stream).await;
        send_reply(&mut stream, &ServerMessage::my_info(7)).await;
        let _ = read_request(&mut stream).await; // acknowledge

        // Connected-users request arrives; answer it with a broadcast
        // push in front of the reply, then a direct push behind it.
        let _ = read_request(&mut stream).await;
        send_reply(
            &mut stream,
            &ServerMessage::broadcast_notification(3, "carol", "hi room"),
        )
        .await;
        send_reply(
            &mut stream,
            &ServerMessage::ConnectedUsers(ConnectedUsersResponse {
                users: vec![ConnectedUser {
                    id: 3,
                    name: "carol".into(),
                    status: "online".into(),
                }],
            }),
        )
        .await;
        send_reply(
            &mut stream,
            &ServerMessage::direct_notification(3, "carol", "just you"),
        )
        .await;
        tokio::time::sleep(TICK).await;
    });

    let session = ClientSession::connect(&host, port, "alice").await.unwrap();
    session.login().await.unwrap();

    let users = timeout(TICK, session.request_connected_users())
        .await
        .unwrap()
        .unwrap();
    assert!(users.contains_key("carol"));
    assert_eq!(session.connected_users().len(), 1);

    let broadcast = timeout(TICK, session.next_message(Category::Broadcast))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broadcast.from_id, 3);
    assert_eq!(broadcast.from_username, "carol");
    assert_eq!(broadcast.body, "hi room");

    let direct = timeout(TICK, session.next_message(Category::Direct))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(direct.body, "just you");
}

#[tokio::test]
async fn peer_disconnect_fails_the_call_in_flight() {
    let (listener, host, port) = bind_script().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut stream).await;
        send_reply(&mut stream, &ServerMessage::my_info(1)).await;
        let _ = read_request(&mut stream).await; // acknowledge

        // Read the broadcast request, then hang up instead of replying.
        let _ = read_request(&mut stream).await;
        drop(stream);
    });

    let session = ClientSession::connect(&host, port, "alice").await.unwrap();
    session.login().await.unwrap();

    match timeout(TICK, session.broadcast("anyone there?")).await.unwrap() {
        Err(ClientError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
    assert!(session.is_stopped());

    match timeout(TICK, session.direct_message("still there?", Destination::Id(2)))
        .await
        .unwrap()
    {
        Err(ClientError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn stop_session_is_idempotent_and_concurrent() {
    let (listener, host, port) = bind_script().await;

    let script = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut stream).await;
        send_reply(&mut stream, &ServerMessage::my_info(5)).await;
        let _ = read_request(&mut stream).await; // acknowledge

        // Wait for the client to hang up.
        let mut tail = Vec::new();
        let _ = stream.read_to_end(&mut tail).await;
    });

    let session = Arc::new(ClientSession::connect(&host, port, "alice").await.unwrap());
    session.login().await.unwrap();

    let a = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.stop_session().await })
    };
    let b = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.stop_session().await })
    };
    timeout(TICK, a).await.unwrap().unwrap();
    timeout(TICK, b).await.unwrap().unwrap();

    assert!(session.is_stopped());

    // The peer observing EOF proves the receive loop's socket went down.
    timeout(TICK, script).await.unwrap().unwrap();

    match session.broadcast("too late").await {
        Err(ClientError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_address_fails_without_connecting() {
    match ClientSession::connect("not-an-ip", 9000, "alice").await {
        Err(ClientError::InvalidAddress(addr)) => assert_eq!(addr, "not-an-ip"),
        other => panic!("expected InvalidAddress, got {:?}", other),
    }
}
