//! Low-level wire types and constants.
//!
//! This module defines:
//! - Option tags for request and reply envelopes.
//! - Protocol versioning.
//! - Frame-size limits shared by both sides.
//!
//! The actual encode/decode logic lives in `binary_codec`.

/// Current protocol version.
///
/// This can be bumped in the future if we change the framing or add
/// incompatible message variants.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum size of one encoded envelope, in bytes.
///
/// Frames larger than this are rejected on both encode and decode;
/// the transport layers use the same bound when framing the stream.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Request option tags (client → server).
///
/// These IDs are used in the first byte of each binary frame.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireRequestTag {
    /// Login handshake carrying username and host.
    Synchronize = 1,

    /// Ask for the connected-user list.
    ConnectedUsers = 2,

    /// Change the caller's presence status.
    ChangeStatus = 3,

    /// Broadcast a message to all other users.
    Broadcast = 4,

    /// Direct message to one user, by id or by name.
    DirectMessage = 5,

    /// Post-login acknowledgement; no reply expected.
    Acknowledge = 6,
}

impl WireRequestTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WireRequestTag::Synchronize),
            2 => Some(WireRequestTag::ConnectedUsers),
            3 => Some(WireRequestTag::ChangeStatus),
            4 => Some(WireRequestTag::Broadcast),
            5 => Some(WireRequestTag::DirectMessage),
            6 => Some(WireRequestTag::Acknowledge),
            _ => None,
        }
    }
}

/// Reply option tags (server → client).
///
/// Tags 1 and 2 are unsolicited pushes; the rest answer one request
/// each. Tag 3 is the uniform failure reply for every request kind.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireReplyTag {
    /// Broadcast notification pushed to recipients.
    BroadcastNotification = 1,

    /// Direct-message notification pushed to one recipient.
    DirectNotification = 2,

    /// Operation failed; payload is a human-readable message.
    Error = 3,

    /// Login reply carrying the assigned user id.
    MyInfo = 4,

    /// Registry snapshot.
    ConnectedUsers = 5,

    /// Echo of a stored status change.
    ChangeStatusResponse = 6,

    /// Broadcast fan-out confirmation.
    BroadcastResponse = 7,

    /// Direct-message hand-off confirmation.
    DirectMessageResponse = 8,
}

impl WireReplyTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WireReplyTag::BroadcastNotification),
            2 => Some(WireReplyTag::DirectNotification),
            3 => Some(WireReplyTag::Error),
            4 => Some(WireReplyTag::MyInfo),
            5 => Some(WireReplyTag::ConnectedUsers),
            6 => Some(WireReplyTag::ChangeStatusResponse),
            7 => Some(WireReplyTag::BroadcastResponse),
            8 => Some(WireReplyTag::DirectMessageResponse),
            _ => None,
        }
    }
}

/// Presence flag for the direct-message destination id field.
pub const DM_HAS_DEST_ID: u8 = 0b0000_0001;

/// Presence flag for the direct-message destination username field.
pub const DM_HAS_DEST_NAME: u8 = 0b0000_0010;
