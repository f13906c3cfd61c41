//! Event routing: sinks plus escalation
//!
//! Every classified record is written twice: once to the channel of its
//! severity and once to the `request_processed` analytics channel. Severe
//! levels are also forwarded to the [`Notifier`]. Nothing here returns an
//! error; sink and transport failures are logged and contained, and a sink
//! that stalls is cut off by the [`SinkSet`] write timeout.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::notify::{Notification, Notifier};
use crate::rate_limit::RateLimitResult;
use crate::record::AuditRecord;
use crate::severity::SeverityLevel;
use crate::sink::{Channel, LogEntry, SinkSet};

/// Response time above which a message mentions a slow response
const SLOW_RESPONSE_MS: u64 = 1000;

/// Memory above which a message mentions high memory
const HIGH_MEMORY_MB: f64 = 100.0;

/// Constant tags attached to analytics entries
const ANALYTICS_TAGS: &[(&str, &str)] = &[
    ("audit_type", "request_response"),
    ("log_category", "performance_monitoring"),
];

/// Record fields forwarded with a notification
const NOTIFICATION_FIELDS: &[&str] = &[
    "id",
    "request_id",
    "method",
    "path",
    "status_code",
    "response_time_ms",
    "ip_address",
    "user_id",
    "memory_peak_mb",
    "rate_limit",
];

/// Dispatches audit entries to sinks and notifications
#[derive(Clone)]
pub struct EventRouter {
    service_name: String,
    sinks: SinkSet,
    notifier: Notifier,
}

impl EventRouter {
    /// Create a router
    pub fn new(service_name: impl Into<String>, sinks: SinkSet, notifier: Notifier) -> Self {
        Self {
            service_name: service_name.into(),
            sinks,
            notifier,
        }
    }

    /// Sinks this router writes to
    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Route one classified request
    pub async fn route(&self, record: &AuditRecord, rate_limit: &RateLimitResult, level: SeverityLevel) {
        let message = build_message(record, rate_limit);

        let mut fields = to_fields(record);
        fields.insert("rate_limit".to_string(), to_value(rate_limit));

        let entry = LogEntry::new(Channel::Severity(level), level, message, fields);

        let mut analytics = entry.redirect(Channel::RequestProcessed);
        for (key, value) in ANALYTICS_TAGS {
            analytics
                .fields
                .insert((*key).to_string(), Value::String((*value).to_string()));
        }

        // Each write is bounded by the sink set's write timeout
        futures::future::join(self.write(&entry), self.write(&analytics)).await;

        self.escalate(&entry);
    }

    /// Send an ad-hoc event through the severity sinks
    ///
    /// Escalates like a request event. No analytics copy is written.
    pub async fn emit(&self, level: SeverityLevel, message: impl Into<String>, fields: Map<String, Value>) {
        let entry = LogEntry::new(Channel::Severity(level), level, message, fields);
        self.write(&entry).await;
        self.escalate(&entry);
    }

    async fn write(&self, entry: &LogEntry) {
        if let Err(e) = self.sinks.write(entry).await {
            tracing::warn!(
                channel = entry.channel.name(),
                error = %e,
                "Audit sink write failed"
            );
        }
    }

    fn escalate(&self, entry: &LogEntry) {
        if !entry.level.escalates() {
            return;
        }

        let fields = NOTIFICATION_FIELDS
            .iter()
            .filter_map(|key| {
                entry
                    .fields
                    .get(*key)
                    .filter(|v| !v.is_null())
                    .map(|v| ((*key).to_string(), v.clone()))
            })
            .collect();

        let notification = Notification::new(
            entry.level,
            self.service_name.clone(),
            entry.message.clone(),
            fields,
        );
        if self.notifier.notify(notification) {
            tracing::debug!(level = %entry.level, "Audit notification dispatched");
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("service_name", &self.service_name)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

/// Human-readable summary: `"{METHOD} {PATH}"` plus notable components
pub fn build_message(record: &AuditRecord, rate_limit: &RateLimitResult) -> String {
    let mut components = Vec::new();

    if rate_limit.exceeded {
        components.push(format!("Rate limit exceeded ({} requests)", rate_limit.max_count));
    }
    if record.response.response_time_ms > SLOW_RESPONSE_MS {
        components.push(format!("Slow response ({}ms)", record.response.response_time_ms));
    }
    if record.response.status_code >= 400 {
        components.push(format!("HTTP {}", record.response.status_code));
    }
    let memory = record.memory_mb();
    if memory > HIGH_MEMORY_MB {
        components.push(format!("High memory ({:.1}MB)", memory));
    }

    let base = format!("{} {}", record.request.method, record.request.path);
    if components.is_empty() {
        base
    } else {
        format!("{} - {}", base, components.join(", "))
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize audit data");
        Value::Null
    })
}

fn to_fields<T: Serialize>(value: &T) -> Map<String, Value> {
    match to_value(value) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
