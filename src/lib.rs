//! talkrelay - Presence-aware real-time message relay
//!
//! Clients register under a phone number over a WebSocket, exchange text
//! messages while online, and get a push notification when a message
//! arrives while they are offline.
//!
//! ## Architecture
//!
//! ```text
//! Client (WS) → Session → MessageRouter → Registry → recipient connection
//!                                      ↘ NotificationGateway (push)
//! ```
//!
//! ## Environment Variables
//!
//! - `PORT` - Listen port (default 10000)
//! - `FCM_SERVER_KEY` - Enables FCM push when set
//!
//! See [`Config`] for the full list.

pub mod config;
pub mod envelope;
pub mod notify;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use envelope::{ClientEnvelope, EnvelopeError, ServerMessage};
pub use notify::{DisabledGateway, NotificationGateway, NotifyError};
pub use registry::{ConnectionHandle, Registry, RegistryEntry};
pub use router::{MessageRouter, RouteFailure, RouteOutcome};
pub use server::AppState;
pub use session::{Session, SessionState};

#[cfg(feature = "fcm")]
pub use notify::FcmGateway;
