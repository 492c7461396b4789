//! Shared types for the chat TCP server.
//!
//! This module defines the channel aliases between the per-connection
//! reader/dispatcher and its writer task. The registry stores one
//! `OutboundTx` per registered user, which is how fan-out reaches
//! other connections without touching their sockets directly.

use chat_core::ServerMessage;
use tokio::sync::mpsc;

/// Outbound messages to a given client connection.
pub type OutboundTx = mpsc::UnboundedSender<ServerMessage>;
pub type OutboundRx = mpsc::UnboundedReceiver<ServerMessage>;
