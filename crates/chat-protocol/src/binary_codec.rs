//! Binary encoding/decoding for chat-core messages.
//!
//! This module converts between:
//! - raw binary frames (`&[u8]`)
//! - high-level `chat_core::ClientRequest` / `ServerMessage`
//!
//! Framing model (single-message buffer):
//!
//! ```text
//! Common header
//! -------------
//! [0]   : option tag (WireRequestTag / WireReplyTag as u8)
//! [1]   : version  (PROTOCOL_VERSION)
//! [2..4]: reserved = 0
//! [4..] : body (depends on tag)
//!
//! Strings are u16 BE length + UTF-8 bytes; integers are u32 BE.
//!
//! Request (client → server)
//! -------------------------
//! Synchronize (tag=1):       username, host
//! ConnectedUsers (tag=2):    user_id (u32), username
//! ChangeStatus (tag=3):      status
//! Broadcast (tag=4):         text
//! DirectMessage (tag=5):     flags (u8: bit0 dest_id, bit1 dest_name),
//!                            [dest_id (u32)], [dest_username], text
//! Acknowledge (tag=6):       user_id (u32)
//!
//! Reply (server → client)
//! -----------------------
//! BroadcastNotification (tag=1): from_id (u32), from_username, text
//! DirectNotification (tag=2):    from_id (u32), from_username, text
//! Error (tag=3):                 message
//! MyInfo (tag=4):                user_id (u32)
//! ConnectedUsers (tag=5):        count (u16 BE), then per user:
//!                                id (u32), name, status
//! ChangeStatusResponse (tag=6):  status
//! BroadcastResponse (tag=7):     status
//! DirectMessageResponse (tag=8): status
//! ```
//!
//! NOTE: This module encodes/decodes **one message per buffer**. The TCP
//! layers provide their own framing (length-prefix per frame) using these
//! functions for the payload.

use std::fmt;

use chat_core::{
    Acknowledge, BroadcastRequest, ChangeStatusRequest, ClientRequest, ConnectedUser,
    ConnectedUsersRequest, ConnectedUsersResponse, DirectMessageRequest, ErrorReply,
    MyInfoResponse, Notification, ServerMessage, StatusReply, Synchronize,
};

use crate::wire_types::{
    DM_HAS_DEST_ID, DM_HAS_DEST_NAME, MAX_FRAME_SIZE, PROTOCOL_VERSION, WireReplyTag,
    WireRequestTag,
};

/// Errors that can arise when encoding/decoding a binary frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the expected fields.
    Truncated,
    /// Unknown or unsupported option tag.
    UnknownMessageType(u8),
    /// Unsupported or mismatched protocol version.
    VersionMismatch(u8),
    /// String too long for the wire, or malformed UTF-8.
    InvalidString,
    /// Invalid flags or other semantic issue.
    InvalidField(&'static str),
    /// Encoded frame would exceed `MAX_FRAME_SIZE`.
    FrameTooLarge(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "Buffer truncated"),
            ProtocolError::UnknownMessageType(t) => write!(f, "Unknown message type: {}", t),
            ProtocolError::VersionMismatch(v) => {
                write!(f, "Protocol version mismatch: got {}, expected {}", v, PROTOCOL_VERSION)
            }
            ProtocolError::InvalidString => write!(f, "Invalid string field"),
            ProtocolError::InvalidField(field) => write!(f, "Invalid field: {}", field),
            ProtocolError::FrameTooLarge(n) => {
                write!(f, "Frame of {} bytes exceeds limit of {}", n, MAX_FRAME_SIZE)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

// ============================================================================
// REQUEST: client → server
// ============================================================================

/// Decode a single request from a binary buffer.
///
/// The buffer must contain exactly one full message as described above.
pub fn decode_request(buf: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let (tag, body) = split_header(buf)?;
    let wire_tag =
        WireRequestTag::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

    match wire_tag {
        WireRequestTag::Synchronize => decode_synchronize(body),
        WireRequestTag::ConnectedUsers => decode_connected_users_request(body),
        WireRequestTag::ChangeStatus => {
            let (status, _) = read_str(body)?;
            Ok(ClientRequest::ChangeStatus(ChangeStatusRequest { status }))
        }
        WireRequestTag::Broadcast => {
            let (text, _) = read_str(body)?;
            Ok(ClientRequest::Broadcast(BroadcastRequest { text }))
        }
        WireRequestTag::DirectMessage => decode_direct_message(body),
        WireRequestTag::Acknowledge => {
            let (user_id, _) = read_u32(body)?;
            Ok(ClientRequest::Acknowledge(Acknowledge { user_id }))
        }
    }
}

/// Encode a single request into a binary frame.
///
/// The encoded bytes are appended to `out`.
pub fn encode_request(msg: &ClientRequest, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let start = out.len();
    match msg {
        ClientRequest::Synchronize(s) => {
            push_header(WireRequestTag::Synchronize as u8, out);
            write_str(&s.username, out)?;
            write_str(&s.host, out)?;
        }
        ClientRequest::ConnectedUsers(c) => {
            push_header(WireRequestTag::ConnectedUsers as u8, out);
            out.extend_from_slice(&c.user_id.to_be_bytes());
            write_str(&c.username, out)?;
        }
        ClientRequest::ChangeStatus(c) => {
            push_header(WireRequestTag::ChangeStatus as u8, out);
            write_str(&c.status, out)?;
        }
        ClientRequest::Broadcast(b) => {
            push_header(WireRequestTag::Broadcast as u8, out);
            write_str(&b.text, out)?;
        }
        ClientRequest::DirectMessage(d) => {
            push_header(WireRequestTag::DirectMessage as u8, out);
            let mut flags = 0u8;
            if d.dest_id.is_some() {
                flags |= DM_HAS_DEST_ID;
            }
            if d.dest_username.is_some() {
                flags |= DM_HAS_DEST_NAME;
            }
            out.push(flags);
            if let Some(id) = d.dest_id {
                out.extend_from_slice(&id.to_be_bytes());
            }
            if let Some(name) = &d.dest_username {
                write_str(name, out)?;
            }
            write_str(&d.text, out)?;
        }
        ClientRequest::Acknowledge(a) => {
            push_header(WireRequestTag::Acknowledge as u8, out);
            out.extend_from_slice(&a.user_id.to_be_bytes());
        }
    }
    check_frame_len(out.len() - start)
}

fn decode_synchronize(body: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let (username, rest) = read_str(body)?;
    let (host, _) = read_str(rest)?;
    Ok(ClientRequest::Synchronize(Synchronize { username, host }))
}

fn decode_connected_users_request(body: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let (user_id, rest) = read_u32(body)?;
    let (username, _) = read_str(rest)?;
    Ok(ClientRequest::ConnectedUsers(ConnectedUsersRequest {
        user_id,
        username,
    }))
}

fn decode_direct_message(body: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let (&flags, mut rest) = body.split_first().ok_or(ProtocolError::Truncated)?;
    if flags & !(DM_HAS_DEST_ID | DM_HAS_DEST_NAME) != 0 {
        return Err(ProtocolError::InvalidField("dm flags"));
    }

    let dest_id = if flags & DM_HAS_DEST_ID != 0 {
        let (id, r) = read_u32(rest)?;
        rest = r;
        Some(id)
    } else {
        None
    };

    let dest_username = if flags & DM_HAS_DEST_NAME != 0 {
        let (name, r) = read_str(rest)?;
        rest = r;
        Some(name)
    } else {
        None
    };

    let (text, _) = read_str(rest)?;
    Ok(ClientRequest::DirectMessage(DirectMessageRequest {
        text,
        dest_id,
        dest_username,
    }))
}

// ============================================================================
// REPLY: server → client
// ============================================================================

/// Encode a single reply into a binary frame.
///
/// The encoded bytes are appended to `out`.
pub fn encode_reply(msg: &ServerMessage, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let start = out.len();
    match msg {
        ServerMessage::BroadcastNotification(n) => {
            push_header(WireReplyTag::BroadcastNotification as u8, out);
            write_notification(n, out)?;
        }
        ServerMessage::DirectNotification(n) => {
            push_header(WireReplyTag::DirectNotification as u8, out);
            write_notification(n, out)?;
        }
        ServerMessage::Error(e) => {
            push_header(WireReplyTag::Error as u8, out);
            write_str(&e.message, out)?;
        }
        ServerMessage::MyInfo(m) => {
            push_header(WireReplyTag::MyInfo as u8, out);
            out.extend_from_slice(&m.user_id.to_be_bytes());
        }
        ServerMessage::ConnectedUsers(c) => {
            push_header(WireReplyTag::ConnectedUsers as u8, out);
            let count = u16::try_from(c.users.len())
                .map_err(|_| ProtocolError::InvalidField("user count"))?;
            out.extend_from_slice(&count.to_be_bytes());
            for user in &c.users {
                out.extend_from_slice(&user.id.to_be_bytes());
                write_str(&user.name, out)?;
                write_str(&user.status, out)?;
            }
        }
        ServerMessage::ChangeStatusResponse(s) => {
            push_header(WireReplyTag::ChangeStatusResponse as u8, out);
            write_str(&s.status, out)?;
        }
        ServerMessage::BroadcastResponse(s) => {
            push_header(WireReplyTag::BroadcastResponse as u8, out);
            write_str(&s.status, out)?;
        }
        ServerMessage::DirectMessageResponse(s) => {
            push_header(WireReplyTag::DirectMessageResponse as u8, out);
            write_str(&s.status, out)?;
        }
    }
    check_frame_len(out.len() - start)
}

/// Decode a single reply from a binary buffer.
///
/// This is what the **client** side uses when reading from the server.
pub fn decode_reply(buf: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let (tag, body) = split_header(buf)?;
    let wire_tag = WireReplyTag::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

    match wire_tag {
        WireReplyTag::BroadcastNotification => {
            Ok(ServerMessage::BroadcastNotification(read_notification(body)?))
        }
        WireReplyTag::DirectNotification => {
            Ok(ServerMessage::DirectNotification(read_notification(body)?))
        }
        WireReplyTag::Error => {
            let (message, _) = read_str(body)?;
            Ok(ServerMessage::Error(ErrorReply { message }))
        }
        WireReplyTag::MyInfo => {
            let (user_id, _) = read_u32(body)?;
            Ok(ServerMessage::MyInfo(MyInfoResponse { user_id }))
        }
        WireReplyTag::ConnectedUsers => decode_connected_users_reply(body),
        WireReplyTag::ChangeStatusResponse => {
            let (status, _) = read_str(body)?;
            Ok(ServerMessage::ChangeStatusResponse(StatusReply { status }))
        }
        WireReplyTag::BroadcastResponse => {
            let (status, _) = read_str(body)?;
            Ok(ServerMessage::BroadcastResponse(StatusReply { status }))
        }
        WireReplyTag::DirectMessageResponse => {
            let (status, _) = read_str(body)?;
            Ok(ServerMessage::DirectMessageResponse(StatusReply { status }))
        }
    }
}

fn decode_connected_users_reply(body: &[u8]) -> Result<ServerMessage, ProtocolError> {
    if body.len() < 2 {
        return Err(ProtocolError::Truncated);
    }
    let count = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut rest = &body[2..];

    let mut users = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let (id, r) = read_u32(rest)?;
        let (name, r) = read_str(r)?;
        let (status, r) = read_str(r)?;
        rest = r;
        users.push(ConnectedUser { id, name, status });
    }

    Ok(ServerMessage::ConnectedUsers(ConnectedUsersResponse { users }))
}

fn write_notification(n: &Notification, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    out.extend_from_slice(&n.from_id.to_be_bytes());
    write_str(&n.from_username, out)?;
    write_str(&n.text, out)
}

fn read_notification(body: &[u8]) -> Result<Notification, ProtocolError> {
    let (from_id, rest) = read_u32(body)?;
    let (from_username, rest) = read_str(rest)?;
    let (text, _) = read_str(rest)?;
    Ok(Notification {
        from_id,
        from_username,
        text,
    })
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn push_header(tag: u8, out: &mut Vec<u8>) {
    out.push(tag);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&[0, 0]); // reserved
}

fn split_header(buf: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let version = buf[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }
    Ok((buf[0], &buf[4..]))
}

fn check_frame_len(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}

fn write_str(s: &str, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::InvalidString)?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_str(buf: &[u8]) -> Result<(String, &[u8]), ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::Truncated);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return Err(ProtocolError::Truncated);
    }
    let s = std::str::from_utf8(&buf[2..2 + len])
        .map_err(|_| ProtocolError::InvalidString)?
        .to_string();
    Ok((s, &buf[2 + len..]))
}

fn read_u32(buf: &[u8]) -> Result<(u32, &[u8]), ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let arr: [u8; 4] = buf[0..4].try_into().expect("slice with incorrect length");
    Ok((u32::from_be_bytes(arr), &buf[4..]))
}
