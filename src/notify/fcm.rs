//! Firebase Cloud Messaging backend
//!
//! Uses the FCM HTTP endpoint with a server key. One request per
//! notification, no retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::notify::{NotificationGateway, NotifyError};

/// Default FCM HTTP endpoint
pub const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// FCM-backed gateway
pub struct FcmGateway {
    http: reqwest::Client,
    endpoint: String,
    server_key: String,
}

/// Delivery counters from the FCM response body
#[derive(Debug, Default, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
}

impl FcmGateway {
    /// Create a new FCM gateway
    ///
    /// # Arguments
    /// * `endpoint` - FCM send URL (normally [`FCM_ENDPOINT`])
    /// * `server_key` - FCM server key sent as `Authorization: key=...`
    /// * `timeout` - Per-request timeout, `None` for no limit
    pub fn new(
        endpoint: impl Into<String>,
        server_key: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, NotifyError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: endpoint.into(),
            server_key: server_key.into(),
        })
    }

    fn payload(token: &str, title: &str, body: &str) -> Value {
        json!({
            "to": token,
            "priority": "high",
            "notification": {
                "title": title,
                "body": body,
            },
        })
    }
}

fn check_delivery(response: &FcmResponse) -> Result<(), NotifyError> {
    if response.failure > 0 || response.success == 0 {
        return Err(NotifyError::Undelivered);
    }
    Ok(())
}

#[async_trait]
impl NotificationGateway for FcmGateway {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&Self::payload(token, title, body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        let counters: FcmResponse = response.json().await?;
        debug!(
            success = counters.success,
            failure = counters.failure,
            "FCM response"
        );
        check_delivery(&counters)
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

impl std::fmt::Debug for FcmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmGateway")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
