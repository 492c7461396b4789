//! Message types used by the chat protocol engine.
//!
//! These are **transport-agnostic** logical messages:
//! - [`ClientRequest`]: what a client sends to the server.
//! - [`ServerMessage`]: what the server sends back, solicited or not.
//!
//! Each variant corresponds to exactly one wire option tag, so an
//! envelope always carries exactly one populated payload.
//!
//! Note: the binary encoder lives in the `chat-protocol` crate; this
//! module is purely logical.

/// A request from a client to the server.
///
/// `Synchronize` is the login handshake and must be the first request
/// on a new connection; everything else requires a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Log in: register `username` with the server.
    Synchronize(Synchronize),

    /// Ask for the list of currently connected users.
    ConnectedUsers(ConnectedUsersRequest),

    /// Change the caller's presence status.
    ChangeStatus(ChangeStatusRequest),

    /// Send a message to every other connected user.
    Broadcast(BroadcastRequest),

    /// Send a message to a single user, addressed by id or by name.
    DirectMessage(DirectMessageRequest),

    /// Post-login acknowledgement. Fire-and-forget; the server sends
    /// no reply.
    Acknowledge(Acknowledge),
}

/// A message from the server to a client.
///
/// `BroadcastNotification` and `DirectNotification` are unsolicited
/// pushes; every other variant answers exactly one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Another user broadcast a message.
    BroadcastNotification(Notification),

    /// Another user sent the recipient a direct message.
    DirectNotification(Notification),

    /// The request failed; `message` is human-readable.
    Error(ErrorReply),

    /// Login succeeded; carries the assigned user id.
    MyInfo(MyInfoResponse),

    /// Snapshot of the registry at the time of the request.
    ConnectedUsers(ConnectedUsersResponse),

    /// Echo of the status stored by a change-status request.
    ChangeStatusResponse(StatusReply),

    /// Confirmation that a broadcast fan-out was attempted.
    BroadcastResponse(StatusReply),

    /// Confirmation that a direct message was handed off.
    DirectMessageResponse(StatusReply),
}

/// Login request (input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synchronize {
    /// Name to register; the unique registry key.
    pub username: String,

    /// Host identity of the client, informational only.
    pub host: String,
}

/// Connected-users query (input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedUsersRequest {
    pub user_id: u32,
    pub username: String,
}

/// Status change (input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeStatusRequest {
    pub status: String,
}

/// Broadcast to all connected users (input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub text: String,
}

/// Direct message (input).
///
/// At most one of `dest_id` / `dest_username` is expected; `None`
/// means "not specified", never "user 0".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessageRequest {
    pub text: String,
    pub dest_id: Option<u32>,
    pub dest_username: Option<String>,
}

/// Post-login acknowledgement (input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub user_id: u32,
}

/// Unsolicited broadcast or direct notification (output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from_id: u32,
    pub from_username: String,
    pub text: String,
}

/// Server-reported failure (output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub message: String,
}

/// Login reply carrying the assigned user id (output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyInfoResponse {
    pub user_id: u32,
}

/// Registry snapshot (output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedUsersResponse {
    pub users: Vec<ConnectedUser>,
}

/// One registry entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedUser {
    pub id: u32,
    pub name: String,
    pub status: String,
}

/// Plain status string carried by the confirmation replies (output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub status: String,
}

/// Which notification queue a received message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Broadcast,
    Direct,
}

/// A notification after the receive loop has classified it.
///
/// Immutable once constructed; produced only by the session's receive
/// loop and consumed by the polling side through pops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub category: Category,
    pub from_id: u32,
    pub from_username: String,
    pub body: String,
}

// -----------------------------------------------------------------------------
// Convenience constructors
// -----------------------------------------------------------------------------

impl ServerMessage {
    /// Convenience constructor for a broadcast notification.
    pub fn broadcast_notification(
        from_id: u32,
        from_username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ServerMessage::BroadcastNotification(Notification {
            from_id,
            from_username: from_username.into(),
            text: text.into(),
        })
    }

    /// Convenience constructor for a direct notification.
    pub fn direct_notification(
        from_id: u32,
        from_username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ServerMessage::DirectNotification(Notification {
            from_id,
            from_username: from_username.into(),
            text: text.into(),
        })
    }

    /// Convenience constructor for an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorReply {
            message: message.into(),
        })
    }

    /// Convenience constructor for a login reply.
    pub fn my_info(user_id: u32) -> Self {
        ServerMessage::MyInfo(MyInfoResponse { user_id })
    }
}

impl ReceivedMessage {
    /// Build a received message from a decoded notification.
    pub fn from_notification(category: Category, n: Notification) -> Self {
        ReceivedMessage {
            category,
            from_id: n.from_id,
            from_username: n.from_username,
            body: n.text,
        }
    }
}
