//! chat-client
//!
//! Client session library for the chat protocol engine: connect and
//! log in, issue synchronous requests, and receive broadcast/direct
//! notifications through typed queues fed by a background receive
//! loop.

pub mod queues;
pub mod session;

pub use queues::MessageQueues;
pub use session::{ClientError, ClientSession, Destination};
