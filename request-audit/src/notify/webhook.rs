//! Webhook notification transport
//!
//! POSTs the JSON-serialized [`Notification`] to the endpoint URL with the
//! endpoint's extra headers. A non-success status counts as a failure.

use std::time::Duration;

use async_trait::async_trait;

use super::{Notification, NotificationTransport};
use crate::config::EndpointConfig;
use crate::error::{Error, Result};

/// HTTP transport built on a shared `reqwest` client
#[derive(Clone, Debug)]
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Create a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebhookTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, endpoint: &EndpointConfig, notification: &Notification) -> Result<()> {
        let mut request = self.client.post(&endpoint.url).json(notification);
        for (key, value) in &endpoint.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "{} returned {}",
                endpoint.url,
                response.status()
            )));
        }

        Ok(())
    }
}
