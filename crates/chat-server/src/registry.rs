//! Registry of currently registered users.
//!
//! The registry is the one piece of state shared by every connection
//! task. It owns the map outright and exposes only atomic operations;
//! the raw map is never handed out for external locking. Each public
//! method is a single critical section, and nothing inside a critical
//! section blocks: deliveries go through unbounded channel sends.
//!
//! A `std::sync::Mutex` is deliberate here — no await point ever holds
//! the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use chat_core::{ConnectedUser, Notification, ServerMessage};

use crate::types::OutboundTx;

/// Status assigned to a user at registration time.
pub const DEFAULT_STATUS: &str = "online";

/// Failures surfaced to clients as error replies.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("username '{0}' is already registered")]
    DuplicateUsername(String),

    #[error("no user named '{0}' is connected")]
    UnknownUser(String),

    #[error("no user with id {0} is connected")]
    UnknownUserId(u32),

    #[error("direct message has no destination")]
    MissingDestination,
}

/// One registered user.
///
/// Owned exclusively by the registry; connection tasks refer to users
/// only through the atomic operations below.
struct UserRecord {
    id: u32,
    name: String,
    #[allow(dead_code)]
    addr: SocketAddr,
    status: String,
    outbound: OutboundTx,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    users: HashMap<String, UserRecord>,
}

/// Shared user table, keyed by username.
#[derive(Default)]
pub struct UserRegistry {
    inner: Mutex<Inner>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new user, insert-if-absent.
    ///
    /// Assigns a fresh id (monotonic over the life of the registry) and
    /// returns it. Fails without side effects when the username is
    /// already taken.
    pub fn register(
        &self,
        username: &str,
        addr: SocketAddr,
        outbound: OutboundTx,
    ) -> Result<u32, RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.users.contains_key(username) {
            return Err(RegistryError::DuplicateUsername(username.to_string()));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.users.insert(
            username.to_string(),
            UserRecord {
                id,
                name: username.to_string(),
                addr,
                status: DEFAULT_STATUS.to_string(),
                outbound,
            },
        );
        Ok(id)
    }

    /// Remove a user on disconnect. Idempotent.
    pub fn remove(&self, username: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.users.remove(username);
    }

    /// Snapshot of every registered user, for the connected-users reply.
    pub fn snapshot(&self) -> Vec<ConnectedUser> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut users: Vec<ConnectedUser> = inner
            .users
            .values()
            .map(|u| ConnectedUser {
                id: u.id,
                name: u.name.clone(),
                status: u.status.clone(),
            })
            .collect();
        users.sort_by_key(|u| u.id);
        users
    }

    /// Update a user's status in place and echo the stored value.
    pub fn set_status(&self, username: &str, status: &str) -> Result<String, RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let record = inner
            .users
            .get_mut(username)
            .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?;
        record.status = status.to_string();
        Ok(record.status.clone())
    }

    /// Fan one broadcast out to every registered user except the sender.
    ///
    /// Deliveries are best-effort sends onto each recipient's outbound
    /// channel, taken against the registry as it is right now; a user
    /// registering mid-call may or may not be included. Returns the
    /// number of deliveries attempted.
    pub fn broadcast(&self, from_id: u32, from_username: &str, text: &str) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut delivered = 0;
        for record in inner.users.values() {
            if record.id == from_id {
                continue;
            }
            let note = ServerMessage::broadcast_notification(from_id, from_username, text);
            if record.outbound.send(note).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver one direct notification, resolving the destination by id
    /// or by name inside a single critical section.
    ///
    /// An unknown destination is an error for the sender; nothing is
    /// delivered anywhere in that case.
    pub fn send_direct(
        &self,
        dest_id: Option<u32>,
        dest_username: Option<&str>,
        note: Notification,
    ) -> Result<(), RegistryError> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let record = if let Some(id) = dest_id {
            inner
                .users
                .values()
                .find(|u| u.id == id)
                .ok_or(RegistryError::UnknownUserId(id))?
        } else if let Some(name) = dest_username {
            inner
                .users
                .get(name)
                .ok_or_else(|| RegistryError::UnknownUser(name.to_string()))?
        } else {
            return Err(RegistryError::MissingDestination);
        };

        // A closed channel means the recipient is tearing down; the
        // message is lost, which best-effort delivery allows.
        let _ = record.outbound.send(ServerMessage::DirectNotification(note));
        Ok(())
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
