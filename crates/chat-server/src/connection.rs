//! Per-connection I/O and request routing.
//!
//! Each accepted connection gets:
//! - a writer task draining its outbound channel onto the socket,
//! - this reader/dispatcher loop, which owns the connection state
//!   machine: AWAITING_SYNC until a successful synchronize request,
//!   then REGISTERED until EOF, read failure or server shutdown.
//!
//! Every handler takes exactly one registry critical section and sends
//! exactly one reply back to the requesting connection; broadcast and
//! direct-message handlers additionally push notifications onto other
//! connections' outbound channels.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chat_core::{ClientRequest, ConnectedUsersResponse, Notification, ServerMessage, StatusReply};
use chat_protocol::{decode_request, encode_reply, MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::UserRegistry;
use crate::types::{OutboundRx, OutboundTx};

/// Who this connection is, once registered.
struct SessionInfo {
    user_id: u32,
    username: String,
}

/// Run the I/O loop for a single connection until it closes.
pub(crate) async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<UserRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (mut read_half, write_half) = stream.into_split();

    let (out_tx, out_rx): (OutboundTx, OutboundRx) = mpsc::unbounded_channel();

    // Writer task: drains the outbound channel. It ends when every
    // sender is gone (this task's handle plus the registry record).
    let writer = tokio::spawn(write_loop(write_half, out_rx, peer_addr));

    let mut session: Option<SessionInfo> = None;

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("connection {} stopping: server shutdown", peer_addr);
                break;
            }
            frame = read_frame(&mut read_half) => frame,
        };

        match frame {
            Ok(Some(payload)) => match decode_request(&payload) {
                Ok(request) => {
                    handle_request(request, &mut session, peer_addr, &registry, &out_tx);
                }
                Err(e) => {
                    // A malformed frame is discarded, not fatal: the
                    // sender gets a readable error and the connection
                    // lives on.
                    warn!("connection {} sent undecodable frame: {}", peer_addr, e);
                    let reply = ServerMessage::error(format!("malformed request: {}", e));
                    let _ = out_tx.send(reply);
                }
            },
            Ok(None) => {
                info!("connection {} disconnected", peer_addr);
                break;
            }
            Err(e) => {
                warn!("connection {} read error: {}", peer_addr, e);
                break;
            }
        }
    }

    if let Some(info) = &session {
        registry.remove(&info.username);
        info!("user '{}' (id {}) removed from registry", info.username, info.user_id);
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Route one decoded request through the state machine.
fn handle_request(
    request: ClientRequest,
    session: &mut Option<SessionInfo>,
    peer_addr: SocketAddr,
    registry: &UserRegistry,
    out_tx: &OutboundTx,
) {
    let reply = match session.as_ref() {
        Some(info) => registered_reply(info, request, registry),
        None => awaiting_sync_reply(request, session, peer_addr, registry, out_tx),
    };

    if let Some(reply) = reply {
        // Failure means the writer is gone; the read loop will notice
        // the closed socket on its next pass.
        let _ = out_tx.send(reply);
    }
}

/// AWAITING_SYNC: the first request must be a synchronize. On any other
/// request the connection stays unregistered and gets an error reply;
/// it is never silently treated as registered.
fn awaiting_sync_reply(
    request: ClientRequest,
    session: &mut Option<SessionInfo>,
    peer_addr: SocketAddr,
    registry: &UserRegistry,
    out_tx: &OutboundTx,
) -> Option<ServerMessage> {
    match request {
        ClientRequest::Synchronize(sync) => {
            match registry.register(&sync.username, peer_addr, out_tx.clone()) {
                Ok(user_id) => {
                    info!(
                        "registered '{}' from host '{}' as id {}",
                        sync.username, sync.host, user_id
                    );
                    *session = Some(SessionInfo {
                        user_id,
                        username: sync.username,
                    });
                    Some(ServerMessage::my_info(user_id))
                }
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }
        other => {
            debug!("connection {} sent {:?} before synchronizing", peer_addr, other);
            Some(ServerMessage::error("not registered: synchronize first"))
        }
    }
}

/// REGISTERED steady state: one registry critical section per request,
/// one reply to the caller.
fn registered_reply(
    info: &SessionInfo,
    request: ClientRequest,
    registry: &UserRegistry,
) -> Option<ServerMessage> {
    match request {
        ClientRequest::Synchronize(_) => {
            Some(ServerMessage::error("already registered on this connection"))
        }

        ClientRequest::ConnectedUsers(_) => {
            Some(ServerMessage::ConnectedUsers(ConnectedUsersResponse {
                users: registry.snapshot(),
            }))
        }

        ClientRequest::ChangeStatus(req) => {
            match registry.set_status(&info.username, &req.status) {
                Ok(status) => Some(ServerMessage::ChangeStatusResponse(StatusReply { status })),
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        ClientRequest::Broadcast(req) => {
            let delivered = registry.broadcast(info.user_id, &info.username, &req.text);
            debug!(
                "broadcast from '{}' delivered to {} users",
                info.username, delivered
            );
            Some(ServerMessage::BroadcastResponse(StatusReply {
                status: format!("sent to {} users", delivered),
            }))
        }

        ClientRequest::DirectMessage(req) => {
            let note = Notification {
                from_id: info.user_id,
                from_username: info.username.clone(),
                text: req.text,
            };
            match registry.send_direct(req.dest_id, req.dest_username.as_deref(), note) {
                Ok(()) => Some(ServerMessage::DirectMessageResponse(StatusReply {
                    status: "sent".to_string(),
                })),
                Err(e) => Some(ServerMessage::error(e.to_string())),
            }
        }

        // Fire-and-forget by contract; no reply.
        ClientRequest::Acknowledge(ack) => {
            debug!("user '{}' acknowledged id {}", info.username, ack.user_id);
            None
        }
    }
}

/// Read one length-prefixed frame. `Ok(None)` is a clean disconnect.
async fn read_frame(read_half: &mut OwnedReadHalf) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match read_half.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf) as usize;
    if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} out of bounds", frame_len),
        ));
    }

    let mut frame = vec![0u8; frame_len];
    match read_half.read_exact(&mut frame).await {
        Ok(_) => Ok(Some(frame)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Consume outbound messages and write them as frames.
async fn write_loop(mut write_half: OwnedWriteHalf, mut out_rx: OutboundRx, peer_addr: SocketAddr) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = write_message(&mut write_half, &msg).await {
            warn!("connection {} write error: {}", peer_addr, e);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_message(write_half: &mut OwnedWriteHalf, msg: &ServerMessage) -> Result<()> {
    let mut payload = Vec::with_capacity(128);
    encode_reply(msg, &mut payload)?;

    let len = payload.len() as u32;
    write_half.write_all(&len.to_be_bytes()).await?;
    write_half.write_all(&payload).await?;
    write_half.flush().await?;
    Ok(())
}
