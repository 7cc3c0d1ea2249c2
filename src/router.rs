//! Message Router
//!
//! Decides how a chat message reaches its recipient: live delivery over
//! the recipient's open connection, else a push notification if a token
//! is known, else failure. One attempt per call.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::envelope::ServerMessage;
use crate::notify::NotificationGateway;
use crate::registry::Registry;

/// Result of routing one chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the recipient's live connection
    Delivered,
    /// Recipient offline, push notification accepted by the gateway
    Notified,
    /// Neither path worked
    Failed(RouteFailure),
}

/// Why a chat message could not be routed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteFailure {
    #[error("recipient {to} unreachable")]
    Unreachable { to: String },
    #[error("push delivery failed for {to}")]
    PushFailed { to: String },
}

impl RouteOutcome {
    /// Envelope reported back to the sender
    pub fn to_sender_message(&self, to: &str) -> ServerMessage {
        match self {
            Self::Delivered => ServerMessage::reply(format!("message delivered to {to}")),
            Self::Notified => ServerMessage::reply(format!("{to} is offline, notification sent")),
            Self::Failed(failure) => ServerMessage::error(failure.to_string()),
        }
    }
}

/// Title of the push notification for a message from `from`
pub fn notification_title(from: &str) -> String {
    format!("Message de {from}")
}

/// Routes chat messages using the registry and the notification gateway
pub struct MessageRouter {
    registry: Arc<Registry>,
    gateway: Arc<dyn NotificationGateway>,
}

impl MessageRouter {
    pub fn new(registry: Arc<Registry>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { registry, gateway }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Route `text` from `from` to `to`
    ///
    /// Registry lookups return owned values, so no registry lock is held
    /// while sending or while waiting on the gateway. Live delivery never
    /// waits for queue space; a full recipient queue falls back to push.
    pub async fn route(&self, from: &str, to: &str, text: &str) -> RouteOutcome {
        if let Some(connection) = self.registry.lookup_connection(to) {
            let incoming = ServerMessage::IncomingChat {
                from: from.to_string(),
                text: text.to_string(),
            };

            match connection.try_send(incoming) {
                Ok(()) => {
                    debug!(from, to, conn_id = connection.conn_id(), "message delivered");
                    return RouteOutcome::Delivered;
                }
                Err(e) => {
                    warn!(from, to, error = %e, "live delivery failed");
                }
            }
        }

        let Some(token) = self.registry.lookup_token(to) else {
            debug!(from, to, "recipient unreachable");
            return RouteOutcome::Failed(RouteFailure::Unreachable { to: to.to_string() });
        };

        match self
            .gateway
            .send(&token, &notification_title(from), text)
            .await
        {
            Ok(()) => {
                debug!(from, to, gateway = self.gateway.name(), "push notification sent");
                RouteOutcome::Notified
            }
            Err(e) => {
                warn!(from, to, gateway = self.gateway.name(), error = %e, "push notification failed");
                RouteOutcome::Failed(RouteFailure::PushFailed { to: to.to_string() })
            }
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("registry", &self.registry)
            .field("gateway", &self.gateway.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Gateway that records every call and answers with a fixed result
    #[derive(Default)]
    pub(crate) struct RecordingGateway {
        pub calls: Mutex<Vec<(String, String, String)>>,
        pub fail: bool,
    }

    impl RecordingGateway {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push((
                token.to_string(),
                title.to_string(),
                body.to_string(),
            ));
            if self.fail {
                Err(NotifyError::Undelivered)
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn router_with(gateway: Arc<RecordingGateway>) -> (Arc<Registry>, MessageRouter) {
        let registry = Arc::new(Registry::new());
        let router = MessageRouter::new(registry.clone(), gateway);
        (registry, router)
    }

    #[tokio::test]
    async fn test_live_delivery_skips_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        let (conn, mut rx) = registry.open_channel(8);
        registry.register("B", conn);
        registry.register_token("B", "tok");

        let outcome = router.route("A", "B", "hi").await;

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::IncomingChat {
                from: "A".to_string(),
                text: "hi".to_string()
            })
        );
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_with_token_notifies_once() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        registry.register_token("B", "tok-b");

        let outcome = router.route("A", "B", "hi").await;

        assert_eq!(outcome, RouteOutcome::Notified);
        assert_eq!(
            gateway.calls(),
            vec![(
                "tok-b".to_string(),
                "Message de A".to_string(),
                "hi".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_gateway_failure_maps_to_failed() {
        let gateway = Arc::new(RecordingGateway::failing());
        let (registry, router) = router_with(gateway.clone());
        registry.register_token("B", "tok-b");

        let outcome = router.route("A", "B", "hi").await;

        assert_eq!(
            outcome,
            RouteOutcome::Failed(RouteFailure::PushFailed {
                to: "B".to_string()
            })
        );
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails_without_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let (_registry, router) = router_with(gateway.clone());

        let outcome = router.route("A", "C", "hi").await;

        assert_eq!(
            outcome,
            RouteOutcome::Failed(RouteFailure::Unreachable {
                to: "C".to_string()
            })
        );
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_falls_back_to_push() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        let (conn, rx) = registry.open_channel(8);
        registry.register("B", conn);
        registry.register_token("B", "tok-b");
        drop(rx);

        assert_eq!(router.route("A", "B", "hi").await, RouteOutcome::Notified);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_sender() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        let (conn, _rx) = registry.open_channel(1);
        registry.register("B", conn);
        registry.register_token("B", "tok-b");

        assert_eq!(router.route("A", "B", "1").await, RouteOutcome::Delivered);

        let outcome = tokio::time::timeout(Duration::from_secs(3), router.route("A", "B", "2"))
            .await
            .expect("route blocked on a full recipient queue");
        assert_eq!(outcome, RouteOutcome::Notified);
        assert_eq!(
            gateway.calls(),
            vec![(
                "tok-b".to_string(),
                "Message de A".to_string(),
                "2".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_full_queue_without_token_fails() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        let (conn, _rx) = registry.open_channel(1);
        registry.register("B", conn);

        router.route("A", "B", "1").await;
        let outcome = tokio::time::timeout(Duration::from_secs(3), router.route("A", "B", "2"))
            .await
            .expect("route blocked on a full recipient queue");

        assert_eq!(
            outcome,
            RouteOutcome::Failed(RouteFailure::Unreachable {
                to: "B".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_closed_connection_without_token_fails() {
        let gateway = Arc::new(RecordingGateway::default());
        let (registry, router) = router_with(gateway.clone());
        let (conn, rx) = registry.open_channel(8);
        registry.register("B", conn);
        drop(rx);

        let outcome = router.route("A", "B", "hi").await;
        assert!(matches!(
            outcome,
            RouteOutcome::Failed(RouteFailure::Unreachable { .. })
        ));
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_sender_messages() {
        assert_eq!(
            RouteOutcome::Delivered.to_sender_message("B"),
            ServerMessage::reply("message delivered to B")
        );
        assert_eq!(
            RouteOutcome::Notified.to_sender_message("B"),
            ServerMessage::reply("B is offline, notification sent")
        );
        let failed = RouteOutcome::Failed(RouteFailure::Unreachable {
            to: "C".to_string(),
        });
        assert_eq!(
            failed.to_sender_message("C"),
            ServerMessage::error("recipient C unreachable")
        );
    }
}
