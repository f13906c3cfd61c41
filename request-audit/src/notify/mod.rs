//! External notification for severe events
//!
//! Levels that [`SeverityLevel::escalates`] are forwarded to an HTTP
//! endpoint: the one configured for that level, else the shared default.
//! Delivery runs on a spawned task and is attempted once.

pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{EndpointConfig, NotificationConfig};
use crate::error::Result;
use crate::severity::SeverityLevel;

pub use webhook::WebhookTransport;

/// Payload delivered to a notification endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Severity that triggered the notification
    pub level: SeverityLevel,
    /// Service the event came from
    pub service_name: String,
    /// Human-readable summary
    pub message: String,
    /// When the notification was produced
    pub timestamp: DateTime<Utc>,
    /// Key fields of the underlying record
    pub fields: Map<String, Value>,
}

impl Notification {
    /// Create a notification stamped with the current time
    pub fn new(
        level: SeverityLevel,
        service_name: impl Into<String>,
        message: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            level,
            service_name: service_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
            fields,
        }
    }
}

/// Delivery mechanism for notifications
#[async_trait]
pub trait NotificationTransport: Send + Sync + 'static {
    /// Deliver one notification to one endpoint
    async fn send(&self, endpoint: &EndpointConfig, notification: &Notification) -> Result<()>;
}

/// Escalation policy plus transport
#[derive(Clone)]
pub struct Notifier {
    config: Arc<NotificationConfig>,
    transport: Arc<dyn NotificationTransport>,
}

impl Notifier {
    /// Create a notifier
    pub fn new(config: NotificationConfig, transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Notifier backed by the webhook transport
    pub fn webhook(config: NotificationConfig) -> Self {
        let transport = Arc::new(WebhookTransport::new(config.timeout()));
        Self::new(config, transport)
    }

    /// Notifier that never sends anything
    pub fn disabled() -> Self {
        Self::new(
            NotificationConfig {
                enabled: false,
                ..NotificationConfig::default()
            },
            Arc::new(WebhookTransport::default()),
        )
    }

    /// Whether any notification can be sent at all
    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Dispatch a notification if its level escalates and an endpoint exists
    ///
    /// Returns whether a delivery task was spawned. Transport failures are
    /// logged from that task and go no further.
    pub fn notify(&self, notification: Notification) -> bool {
        if !notification.level.escalates() || !self.config.enabled {
            return false;
        }
        let Some(endpoint) = self.config.endpoint_for(notification.level).cloned() else {
            return false;
        };

        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(&endpoint, &notification).await {
                tracing::warn!(
                    url = %endpoint.url,
                    level = %notification.level,
                    error = %e,
                    "Failed to deliver audit notification"
                );
            }
        });
        true
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport recording every delivery
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<(String, Notification)>>,
        pub(crate) calls: AtomicUsize,
        pub(crate) fail: bool,
    }

    impl RecordingTransport {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn send(&self, endpoint: &EndpointConfig, notification: &Notification) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::Error::Notification("endpoint down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.url.clone(), notification.clone()));
            Ok(())
        }
    }
}
