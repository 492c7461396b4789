//! chat-protocol
//!
//! Wire-level encoding/decoding for the chat engine.
//!
//! This crate is responsible for turning logical chat messages
//! (`chat_core::ClientRequest` / `ServerMessage`) into bytes and
//! back again. The TCP layers add a length prefix per frame and use
//! these functions for the payload.

pub mod wire_types;
pub mod binary_codec;

pub use binary_codec::{
    ProtocolError,
    decode_request,
    encode_request,
    decode_reply,
    encode_reply,
};
pub use wire_types::MAX_FRAME_SIZE;
