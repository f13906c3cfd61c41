//! Audit sinks
//!
//! A sink receives [`LogEntry`] values for one or more channels. There is
//! one channel per [`SeverityLevel`] plus the `request_processed` analytics
//! channel. Channel-to-sink resolution happens once, when the [`SinkSet`]
//! is built; the router never looks sinks up by name.

pub mod memory;
pub mod syslog;
pub mod tracing_sink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::{SinkConfig, SinkKind};
use crate::error::{Error, Result};
use crate::severity::SeverityLevel;

pub use memory::MemorySink;
pub use syslog::SyslogSink;
pub use tracing_sink::TracingSink;

/// Name of the analytics channel that receives every request
pub const REQUEST_PROCESSED: &str = "request_processed";

/// Destination channel of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Per-severity channel
    Severity(SeverityLevel),
    /// Analytics channel receiving a copy of every request
    RequestProcessed,
}

impl Channel {
    /// Channel name as seen by log consumers
    pub fn name(&self) -> &'static str {
        match self {
            Self::Severity(level) => level.as_str(),
            Self::RequestProcessed => REQUEST_PROCESSED,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// One structured entry written to a sink
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// When the entry was produced
    pub timestamp: DateTime<Utc>,
    /// Destination channel
    pub channel: Channel,
    /// Severity of the underlying event
    pub level: SeverityLevel,
    /// Human-readable summary
    pub message: String,
    /// Flat key-value payload (the full record for request events)
    pub fields: Map<String, Value>,
}

impl LogEntry {
    /// Create an entry
    pub fn new(
        channel: Channel,
        level: SeverityLevel,
        message: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            channel,
            level,
            message: message.into(),
            fields,
        }
    }

    /// Copy of this entry addressed to another channel
    pub fn redirect(&self, channel: Channel) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }

    /// Field lookup
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A write-only destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Write one entry. Failures are reported, never retried by the caller.
    async fn write(&self, entry: &LogEntry) -> Result<()>;
}

/// Default upper bound on one sink write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Static mapping from channels to sinks
#[derive(Clone)]
pub struct SinkSet {
    levels: [Arc<dyn AuditSink>; 7],
    analytics: Arc<dyn AuditSink>,
    write_timeout: Duration,
}

impl SinkSet {
    /// Route every channel to the same sink
    pub fn uniform(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            levels: std::array::from_fn(|_| sink.clone()),
            analytics: sink,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Bound every write by `timeout`
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the sink for one severity level
    pub fn with_level(mut self, level: SeverityLevel, sink: Arc<dyn AuditSink>) -> Self {
        self.levels[level.index()] = sink;
        self
    }

    /// Override the analytics sink
    pub fn with_analytics(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.analytics = sink;
        self
    }

    /// Sink for a channel
    pub fn for_channel(&self, channel: Channel) -> &Arc<dyn AuditSink> {
        match channel {
            Channel::Severity(level) => &self.levels[level.index()],
            Channel::RequestProcessed => &self.analytics,
        }
    }

    /// Write an entry to its channel's sink within the write timeout
    ///
    /// A write that overruns is cancelled and reported as a sink error.
    pub async fn write(&self, entry: &LogEntry) -> Result<()> {
        let sink = self.for_channel(entry.channel);
        match tokio::time::timeout(self.write_timeout, sink.write(entry)).await {
            Ok(result) => result,
            Err(_) => Err(Error::sink(
                entry.channel.name(),
                format!("write timed out after {}ms", self.write_timeout.as_millis()),
            )),
        }
    }

    /// Build the configured backend for every channel
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let sink: Arc<dyn AuditSink> = match config.kind {
            SinkKind::Tracing => Arc::new(TracingSink),
            SinkKind::Syslog => Arc::new(SyslogSink::new(&config.syslog)?),
        };
        Ok(Self::uniform(sink).with_write_timeout(config.write_timeout()))
    }
}

impl Default for SinkSet {
    fn default() -> Self {
        Self::uniform(Arc::new(TracingSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Severity(SeverityLevel::Emergency).name(), "emergency");
        assert_eq!(Channel::Severity(SeverityLevel::Info).name(), "info");
        assert_eq!(Channel::RequestProcessed.name(), "request_processed");
    }

    #[tokio::test]
    async fn test_sink_set_overrides_are_per_channel() {
        let shared = Arc::new(MemorySink::new());
        let critical = Arc::new(MemorySink::new());
        let sinks = SinkSet::uniform(shared.clone())
            .with_level(SeverityLevel::Critical, critical.clone());

        let entry = LogEntry::new(
            Channel::Severity(SeverityLevel::Critical),
            SeverityLevel::Critical,
            "GET /",
            Map::new(),
        );
        sinks.for_channel(entry.channel).write(&entry).await.unwrap();
        let analytics = entry.redirect(Channel::RequestProcessed);
        sinks.for_channel(analytics.channel).write(&analytics).await.unwrap();

        assert_eq!(critical.len(), 1);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared.entries()[0].channel, Channel::RequestProcessed);
    }

    struct StalledSink;

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn write(&self, _entry: &LogEntry) -> Result<()> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let sinks = SinkSet::uniform(Arc::new(StalledSink))
            .with_write_timeout(Duration::from_millis(20));
        let entry = LogEntry::new(
            Channel::Severity(SeverityLevel::Warning),
            SeverityLevel::Warning,
            "GET /",
            Map::new(),
        );

        let err = sinks.write(&entry).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_from_config_uses_write_timeout() {
        let config = SinkConfig {
            write_timeout_ms: 75,
            ..Default::default()
        };
        let sinks = SinkSet::from_config(&config).unwrap();
        assert_eq!(sinks.write_timeout, Duration::from_millis(75));
    }

    #[test]
    fn test_entry_serializes_channel_name() {
        let entry = LogEntry::new(
            Channel::RequestProcessed,
            SeverityLevel::Info,
            "GET /",
            Map::new(),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["channel"], "request_processed");
        assert_eq!(json["level"], "info");
    }
}
