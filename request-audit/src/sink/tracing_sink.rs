//! Sink emitting entries as `tracing` events
//!
//! Entries go out under the `request_audit::audit` target so a subscriber
//! can split them from the crate's own diagnostics with a target filter.

use async_trait::async_trait;

use super::{AuditSink, Channel, LogEntry};
use crate::error::{Error, Result};
use crate::severity::SeverityLevel;

/// Default sink: one `tracing` event per entry
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        let record = serde_json::to_string(&entry.fields)
            .map_err(|e| Error::sink(entry.channel.name(), e.to_string()))?;
        let channel = entry.channel.name();
        let level = entry.level.as_str();

        match tracing_level(entry) {
            tracing::Level::ERROR => tracing::error!(
                target: "request_audit::audit",
                channel,
                level,
                record = %record,
                "{}",
                entry.message
            ),
            tracing::Level::WARN => tracing::warn!(
                target: "request_audit::audit",
                channel,
                level,
                record = %record,
                "{}",
                entry.message
            ),
            _ => tracing::info!(
                target: "request_audit::audit",
                channel,
                level,
                record = %record,
                "{}",
                entry.message
            ),
        }

        Ok(())
    }
}

/// Tracing level for an entry; the analytics channel always logs at INFO
fn tracing_level(entry: &LogEntry) -> tracing::Level {
    if entry.channel == Channel::RequestProcessed {
        return tracing::Level::INFO;
    }
    match entry.level {
        SeverityLevel::Emergency
        | SeverityLevel::Alert
        | SeverityLevel::Critical
        | SeverityLevel::Error => tracing::Level::ERROR,
        SeverityLevel::Warning => tracing::Level::WARN,
        SeverityLevel::Notice | SeverityLevel::Info => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn entry(channel: Channel, level: SeverityLevel) -> LogEntry {
        LogEntry::new(channel, level, "GET /", Map::new())
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(
            tracing_level(&entry(Channel::Severity(SeverityLevel::Alert), SeverityLevel::Alert)),
            tracing::Level::ERROR
        );
        assert_eq!(
            tracing_level(&entry(Channel::Severity(SeverityLevel::Warning), SeverityLevel::Warning)),
            tracing::Level::WARN
        );
        assert_eq!(
            tracing_level(&entry(Channel::RequestProcessed, SeverityLevel::Emergency)),
            tracing::Level::INFO
        );
    }

    #[tokio::test]
    async fn test_write_succeeds_without_subscriber() {
        let result = TracingSink
            .write(&entry(Channel::Severity(SeverityLevel::Info), SeverityLevel::Info))
            .await;
        assert!(result.is_ok());
    }
}
