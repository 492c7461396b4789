//! Client session: login handshake, synchronous calls, receive loop.
//!
//! One task — the receive loop spawned by [`ClientSession::connect`] —
//! is the only reader of the socket. It demultiplexes every inbound
//! frame: broadcast and direct notifications go to the typed queues,
//! anything else is handed to the at-most-one synchronous caller
//! currently waiting for its reply. Synchronous calls therefore never
//! touch the read half; they serialize a request, write it, and park
//! on a oneshot until the receive loop delivers the answer.
//!
//! One exchange is outstanding at a time: a second call while one is
//! in flight fails with [`ClientError::RequestInFlight`] rather than
//! racing for the reply slot.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::BytesMut;
use chat_core::{
    Acknowledge, BroadcastRequest, Category, ChangeStatusRequest, ClientRequest, ConnectedUser,
    ConnectedUsersRequest, DirectMessageRequest, ReceivedMessage, ServerMessage, Synchronize,
};
use chat_protocol::{decode_reply, encode_request, ProtocolError, MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queues::MessageQueues;

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("protocol error: {0}")]
    Codec(#[from] ProtocolError),

    /// The server answered with an error envelope; the message is also
    /// queued for retrieval via `last_error`.
    #[error("server error: {0}")]
    Server(String),

    /// The reply decoded fine but was not the kind this call expects.
    #[error("unexpected reply from server, expected {expected}")]
    UnexpectedReply { expected: &'static str },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("another request is already in flight")]
    RequestInFlight,
}

/// Addressee of a direct message: by id or by name, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Id(u32),
    Name(String),
}

/// Slot for the one synchronous caller awaiting a reply.
type PendingReply = Arc<Mutex<Option<oneshot::Sender<ServerMessage>>>>;

/// Client-side state for one connection to the chat server.
#[derive(Debug)]
pub struct ClientSession {
    username: String,
    user_id: OnceLock<u32>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingReply,
    queues: Arc<MessageQueues>,
    connected_users: Mutex<HashMap<String, ConnectedUser>>,
    shutdown: CancellationToken,
}

impl ClientSession {
    /// Establish the transport connection and start the receive loop.
    ///
    /// `host` must be an IP address literal. On any failure the session
    /// is not created and nothing is left running.
    pub async fn connect(
        host: &str,
        port: u16,
        username: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ClientError::InvalidAddress(host.to_string()))?;
        let addr = SocketAddr::new(ip, port);

        info!("connecting to {}...", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let session = ClientSession {
            username: username.into(),
            user_id: OnceLock::new(),
            writer: tokio::sync::Mutex::new(write_half),
            pending: Arc::new(Mutex::new(None)),
            queues: Arc::new(MessageQueues::new()),
            connected_users: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(receive_loop(
            read_half,
            Arc::clone(&session.pending),
            Arc::clone(&session.queues),
            session.shutdown.clone(),
        ));

        info!("connected");
        Ok(session)
    }

    /// Log in: register this session's username with the server.
    ///
    /// On success the server-assigned user id is stored (exactly once
    /// for the session's lifetime) and a best-effort acknowledge is
    /// sent; its delivery is not verified.
    pub async fn login(&self) -> Result<u32, ClientError> {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        debug!("logging in as '{}' from host '{}'", self.username, host);

        let request = ClientRequest::Synchronize(Synchronize {
            username: self.username.clone(),
            host,
        });

        match self.round_trip(&request).await? {
            ServerMessage::MyInfo(info) => {
                let _ = self.user_id.set(info.user_id);
                info!("logged in, user id {}", info.user_id);

                let ack = ClientRequest::Acknowledge(Acknowledge {
                    user_id: info.user_id,
                });
                if let Err(e) = self.send(&ack).await {
                    debug!("acknowledge not delivered: {}", e);
                }
                Ok(info.user_id)
            }
            ServerMessage::Error(e) => Err(self.record_server_error(e.message)),
            _ => Err(ClientError::UnexpectedReply { expected: "myinfo" }),
        }
    }

    /// Fetch the connected-user list, replacing the stored snapshot.
    pub async fn request_connected_users(
        &self,
    ) -> Result<HashMap<String, ConnectedUser>, ClientError> {
        let request = ClientRequest::ConnectedUsers(ConnectedUsersRequest {
            user_id: self.user_id().unwrap_or(0),
            username: self.username.clone(),
        });

        match self.round_trip(&request).await? {
            ServerMessage::ConnectedUsers(resp) => {
                let users: HashMap<String, ConnectedUser> = resp
                    .users
                    .into_iter()
                    .map(|u| (u.name.clone(), u))
                    .collect();
                *self
                    .connected_users
                    .lock()
                    .expect("connected-users lock poisoned") = users.clone();
                Ok(users)
            }
            ServerMessage::Error(e) => Err(self.record_server_error(e.message)),
            _ => Err(ClientError::UnexpectedReply {
                expected: "connected users",
            }),
        }
    }

    /// Change this user's presence status; returns the stored value.
    pub async fn change_status(&self, new_status: &str) -> Result<String, ClientError> {
        let request = ClientRequest::ChangeStatus(ChangeStatusRequest {
            status: new_status.to_string(),
        });

        match self.round_trip(&request).await? {
            ServerMessage::ChangeStatusResponse(reply) => {
                debug!("status stored by server: {}", reply.status);
                Ok(reply.status)
            }
            ServerMessage::Error(e) => Err(self.record_server_error(e.message)),
            _ => Err(ClientError::UnexpectedReply {
                expected: "change-status response",
            }),
        }
    }

    /// Broadcast a message to every other connected user.
    pub async fn broadcast(&self, text: &str) -> Result<String, ClientError> {
        let request = ClientRequest::Broadcast(BroadcastRequest {
            text: text.to_string(),
        });

        match self.round_trip(&request).await? {
            ServerMessage::BroadcastResponse(reply) => Ok(reply.status),
            ServerMessage::Error(e) => Err(self.record_server_error(e.message)),
            _ => Err(ClientError::UnexpectedReply {
                expected: "broadcast response",
            }),
        }
    }

    /// Send a direct message to one user.
    pub async fn direct_message(
        &self,
        text: &str,
        dest: Destination,
    ) -> Result<String, ClientError> {
        let (dest_id, dest_username) = match dest {
            Destination::Id(id) => (Some(id), None),
            Destination::Name(name) => (None, Some(name)),
        };
        let request = ClientRequest::DirectMessage(DirectMessageRequest {
            text: text.to_string(),
            dest_id,
            dest_username,
        });

        match self.round_trip(&request).await? {
            ServerMessage::DirectMessageResponse(reply) => Ok(reply.status),
            ServerMessage::Error(e) => Err(self.record_server_error(e.message)),
            _ => Err(ClientError::UnexpectedReply {
                expected: "direct-message response",
            }),
        }
    }

    /// The server-assigned user id, if login has completed.
    pub fn user_id(&self) -> Option<u32> {
        self.user_id.get().copied()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Last known connected-users snapshot (updated only by
    /// `request_connected_users`).
    pub fn connected_users(&self) -> HashMap<String, ConnectedUser> {
        self.connected_users
            .lock()
            .expect("connected-users lock poisoned")
            .clone()
    }

    /// Non-blocking pop from one notification queue.
    pub fn try_pop_message(&self, category: Category) -> Option<ReceivedMessage> {
        self.queues.try_pop(category)
    }

    /// Wait for the next notification in one category. Returns `None`
    /// once the session shuts down with the queue drained.
    pub async fn next_message(&self, category: Category) -> Option<ReceivedMessage> {
        tokio::select! {
            msg = self.queues.pop(category) => Some(msg),
            _ = self.shutdown.cancelled() => self.queues.try_pop(category),
        }
    }

    /// Pop the oldest server-reported error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.queues.last_error()
    }

    /// Begin session shutdown: wake the receive loop and close the
    /// write half so the server sees EOF. Idempotent, callable from
    /// any task, including concurrently with itself.
    pub async fn stop_session(&self) {
        debug!("stopping session for '{}'", self.username);
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Whether shutdown has begun (voluntarily or because the receive
    /// loop hit a transport failure).
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn send(&self, request: &ClientRequest) -> Result<(), ClientError> {
        let mut payload = Vec::with_capacity(128);
        encode_request(request, &mut payload)?;

        let mut writer = self.writer.lock().await;
        // Bail out of a stalled write when shutdown begins, releasing
        // the writer lock that stop_session needs.
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ClientError::ConnectionClosed),
            result = async {
                writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
                writer.write_all(&payload).await?;
                writer.flush().await?;
                Ok::<(), ClientError>(())
            } => result,
        }
    }

    /// Send one request and wait for the receive loop to hand back the
    /// matching reply.
    async fn round_trip(&self, request: &ClientRequest) -> Result<ServerMessage, ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.pending.lock().expect("pending lock poisoned");
            if slot.is_some() {
                return Err(ClientError::RequestInFlight);
            }
            *slot = Some(tx);
        }

        if let Err(e) = self.send(request).await {
            // Free the slot so the failed call doesn't wedge the next one.
            self.pending.lock().expect("pending lock poisoned").take();
            return Err(e);
        }

        // Biased so a reply that raced shutdown still wins; the shutdown
        // arm covers the receive loop dying after the send went out.
        tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| ClientError::ConnectionClosed),
            _ = self.shutdown.cancelled() => {
                self.pending.lock().expect("pending lock poisoned").take();
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    fn record_server_error(&self, message: String) -> ClientError {
        warn!("server reported error: {}", message);
        self.queues.push_error(message.clone());
        ClientError::Server(message)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sole reader of the socket: classify every inbound frame and route it.
///
/// Ends when the session's token fires or a read fails/hits EOF; a read
/// failure is terminal and itself begins session shutdown.
async fn receive_loop(
    mut read_half: OwnedReadHalf,
    pending: PendingReply,
    queues: Arc<MessageQueues>,
    shutdown: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("receive loop stopping: session shutdown");
                break;
            }
            frame = read_frame(&mut read_half, &mut buf) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("server closed the connection, terminating session");
                break;
            }
            Err(e) => {
                warn!("receive loop read error: {}", e);
                break;
            }
        };

        // A frame that does not decode is discarded; the session and
        // the connection stay up.
        let msg = match decode_reply(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("discarding undecodable frame: {}", e);
                continue;
            }
        };

        match msg {
            ServerMessage::BroadcastNotification(n) => {
                queues.push(ReceivedMessage::from_notification(Category::Broadcast, n));
            }
            ServerMessage::DirectNotification(n) => {
                queues.push(ReceivedMessage::from_notification(Category::Direct, n));
            }
            reply => {
                let waiter = pending.lock().expect("pending lock poisoned").take();
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!("dropping reply with no waiting call: {:?}", reply),
                }
            }
        }
    }

    // Terminal: either path through here ends the session. Dropping a
    // parked waiter makes its round_trip observe ConnectionClosed.
    shutdown.cancel();
    pending.lock().expect("pending lock poisoned").take();
}

/// Read one length-prefixed frame payload. `Ok(None)` is a clean EOF.
async fn read_frame(
    read_half: &mut OwnedReadHalf,
    buf: &mut BytesMut,
) -> io::Result<Option<BytesMut>> {
    loop {
        if buf.len() >= 4 {
            let frame_len =
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame length {} out of bounds", frame_len),
                ));
            }
            if buf.len() >= 4 + frame_len {
                let mut frame = buf.split_to(4 + frame_len);
                let payload = frame.split_off(4);
                return Ok(Some(payload));
            }
        }

        let mut tmp = [0u8; 1024];
        let n = read_half.read(&mut tmp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}
