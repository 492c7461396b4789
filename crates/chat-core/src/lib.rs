//! chat-core
//!
//! Pure chat protocol logic:
//! - messages (client request / server reply types)
//! - connected-user snapshots
//! - received-notification records

pub mod messages;

pub use messages::{
    Acknowledge,
    BroadcastRequest,
    Category,
    ChangeStatusRequest,
    ClientRequest,
    ConnectedUser,
    ConnectedUsersRequest,
    ConnectedUsersResponse,
    DirectMessageRequest,
    ErrorReply,
    MyInfoResponse,
    Notification,
    ReceivedMessage,
    ServerMessage,
    StatusReply,
    Synchronize,
};
