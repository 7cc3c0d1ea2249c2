//! Notification Gateway abstraction
//!
//! Push delivery to offline devices is an external capability. The relay
//! only needs to hand a token, a title and a body to something that
//! reports success or failure.
//!
//! # Backends
//!
//! - `fcm` - Firebase Cloud Messaging over HTTP (cargo feature `fcm`, default)
//! - `disabled` - No push configured; every send fails

#[cfg(feature = "fcm")]
mod fcm;

#[cfg(feature = "fcm")]
pub use fcm::{FCM_ENDPOINT, FcmGateway};

mod disabled;

pub use disabled::DisabledGateway;

use async_trait::async_trait;

/// Notification Gateway trait
///
/// Implementations must never panic on delivery problems; every failure is
/// reported through `NotifyError` so the router can turn it into a routed
/// outcome.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Send one push notification to the device behind `token`
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Push delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("push notifications are not configured")]
    Disabled,
    #[cfg(feature = "fcm")]
    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push service rejected the request with status {status}")]
    Rejected { status: u16 },
    #[error("push service did not deliver the notification")]
    Undelivered,
}
