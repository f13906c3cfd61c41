//! In-memory sink for tests and local inspection

use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuditSink, Channel, LogEntry};
use crate::error::Result;

/// Sink that keeps every entry in memory
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries in write order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Entries written to one channel
    pub fn entries_for(&self, channel: Channel) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.channel == channel)
            .cloned()
            .collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        self.lock().push(entry.clone());
        Ok(())
    }
}
