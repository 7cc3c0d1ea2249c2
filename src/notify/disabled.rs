//! Gateway used when no push backend is configured

use async_trait::async_trait;
use tracing::debug;

use crate::notify::{NotificationGateway, NotifyError};

/// Gateway that refuses every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl NotificationGateway for DisabledGateway {
    async fn send(&self, _token: &str, title: &str, _body: &str) -> Result<(), NotifyError> {
        debug!(title, "push skipped, no backend configured");
        Err(NotifyError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_fails() {
        let err = DisabledGateway.send("tok", "title", "body").await.unwrap_err();
        assert!(matches!(err, NotifyError::Disabled));
    }
}
