//! Push channel registry: one live outbound connection per session.
//!
//! Delivery is fire-and-forget: events for a session with no registered
//! connection are dropped, and a broken connection unregisters itself.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::PushEvent;

/// Items drained by a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(PushEvent),
    /// The connection was replaced and should close.
    Close,
}

/// Sending half of a live connection.
#[derive(Debug, Clone)]
pub struct PushConnection {
    pub conn_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PushConnection {
    /// Create a connection and the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4().to_string(),
                tx,
            },
            rx,
        )
    }
}

#[derive(Default)]
pub struct PushChannels {
    channels: RwLock<HashMap<String, PushConnection>>,
}

impl PushChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a session, closing any previous one.
    pub fn register(&self, session_id: &str, connection: PushConnection) {
        let conn_id = connection.conn_id.clone();
        let previous = self
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), connection);

        if let Some(old) = previous {
            let _ = old.tx.send(Outbound::Close);
            info!(session_id, old = %old.conn_id, new = %conn_id, "Push channel replaced");
        } else {
            info!(session_id, conn_id = %conn_id, "Push channel registered");
        }
    }

    /// Deliver an event. Never fails; a dead connection is unregistered.
    pub fn send(&self, session_id: &str, event: PushEvent) {
        let connection = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned();

        let Some(connection) = connection else {
            debug!(session_id, event = event.name(), "No push channel, event dropped");
            return;
        };

        if connection.tx.send(Outbound::Event(event)).is_err() {
            debug!(session_id, conn_id = %connection.conn_id, "Push channel broken");
            self.unregister_connection(session_id, &connection.conn_id);
        }
    }

    /// Remove the session's connection, whatever it is. Idempotent.
    pub fn unregister(&self, session_id: &str) {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if removed.is_some() {
            info!(session_id, "Push channel unregistered");
        }
    }

    /// Remove the session's connection only if it is still `conn_id`.
    pub fn unregister_connection(&self, session_id: &str, conn_id: &str) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if channels
            .get(session_id)
            .is_some_and(|c| c.conn_id == conn_id)
        {
            channels.remove(session_id);
            info!(session_id, conn_id, "Push channel unregistered");
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
