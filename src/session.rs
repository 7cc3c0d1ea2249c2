//! Connection session
//!
//! A session represents a single client connection and carries it through
//! `Unregistered -> Registered -> Closed`. Bad input never changes the
//! state; it only produces an `error` envelope.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::envelope::{self, ClientEnvelope, ServerMessage, required};
use crate::registry::{ConnectionHandle, Registry};
use crate::router::MessageRouter;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered,
    Closed,
}

/// Client session
pub struct Session {
    /// This connection's outbound handle
    handle: ConnectionHandle,
    /// Identity bound by the last successful `register`
    identity: Option<String>,
    state: SessionState,
    registry: Arc<Registry>,
    router: Arc<MessageRouter>,
}

impl Session {
    /// Create a new, unregistered session
    pub fn new(handle: ConnectionHandle, router: Arc<MessageRouter>) -> Self {
        Self {
            handle,
            identity: None,
            state: SessionState::Unregistered,
            registry: router.registry().clone(),
            router,
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.handle.conn_id()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session has a bound identity
    pub fn is_registered(&self) -> bool {
        self.state == SessionState::Registered
    }

    /// Handle one inbound frame, returning the envelope for this client
    pub async fn handle_frame(&mut self, data: &[u8]) -> ServerMessage {
        if self.state == SessionState::Closed {
            return ServerMessage::error("connection closed");
        }

        match envelope::decode(data) {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(e) => {
                warn!(conn_id = self.conn_id(), error = %e, "rejected frame");
                ServerMessage::error(e.client_text())
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: ClientEnvelope) -> ServerMessage {
        match envelope {
            ClientEnvelope::Register { phone } => match required(phone) {
                Some(identity) => self.register(identity),
                None => ServerMessage::error("identity required"),
            },
            ClientEnvelope::FcmRegister { phone, token } => {
                match (required(phone), required(token)) {
                    (Some(identity), Some(token)) => {
                        self.registry.register_token(&identity, &token);
                        info!(conn_id = self.conn_id(), identity = %identity, "push token registered");
                        ServerMessage::info("token registered")
                    }
                    _ => ServerMessage::error("missing fields"),
                }
            }
            ClientEnvelope::Message { from, to, text } => {
                match (required(from), required(to), required(text)) {
                    (Some(from), Some(to), Some(text)) => {
                        let outcome = self.router.route(&from, &to, &text).await;
                        debug!(conn_id = self.conn_id(), from = %from, to = %to, outcome = ?outcome, "message routed");
                        outcome.to_sender_message(&to)
                    }
                    _ => ServerMessage::error("missing fields"),
                }
            }
            ClientEnvelope::Unknown => ServerMessage::error("unknown message type"),
        }
    }

    /// Bind this session to `identity`
    ///
    /// Registering under a different identity first releases the old one.
    fn register(&mut self, identity: String) -> ServerMessage {
        if let Some(previous) = self.identity.take()
            && previous != identity
        {
            self.registry.remove_connection(&previous, &self.handle);
            info!(conn_id = self.conn_id(), previous = %previous, identity = %identity, "session rebound");
        }

        self.registry.register(&identity, self.handle.clone());
        info!(conn_id = self.conn_id(), identity = %identity, "user registered");

        self.identity = Some(identity);
        self.state = SessionState::Registered;
        ServerMessage::info("registered")
    }

    /// Close the session and release its identity
    ///
    /// Idempotent. Only removes the registry binding if it still points at
    /// this connection.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        match self.identity.as_deref() {
            Some(identity) => {
                let removed = self.registry.remove_connection(identity, &self.handle);
                info!(conn_id = self.conn_id(), identity, removed, "user disconnected");
            }
            None => {
                info!(conn_id = self.conn_id(), "unregistered connection closed");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id())
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish()
    }
}
