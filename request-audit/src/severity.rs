//! Severity levels assigned to audited requests

use serde::{Deserialize, Serialize};

/// Severity of an audited request/response cycle
///
/// Variants are declared lowest first, so the derived ordering is
/// `Info < Notice < Warning < Error < Critical < Alert < Emergency`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    /// Nothing noteworthy (syslog 6)
    Info,
    /// Normal but significant condition (syslog 5)
    Notice,
    /// Slow or memory-hungry request (syslog 4)
    Warning,
    /// Client or server error status (syslog 3)
    Error,
    /// Rate limit exceeded, very slow, or admin auth failure (syslog 2)
    Critical,
    /// Gateway-class failure or heavy abuse (syslog 1)
    Alert,
    /// Service effectively unusable (syslog 0)
    Emergency,
}

impl SeverityLevel {
    /// Every level, lowest first
    pub const ALL: [SeverityLevel; 7] = [
        SeverityLevel::Info,
        SeverityLevel::Notice,
        SeverityLevel::Warning,
        SeverityLevel::Error,
        SeverityLevel::Critical,
        SeverityLevel::Alert,
        SeverityLevel::Emergency,
    ];

    /// Sink channel name for this level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }

    /// Numeric syslog severity (RFC 5424, 0-7)
    pub fn as_syslog_severity(&self) -> u8 {
        match self {
            Self::Emergency => 0,
            Self::Alert => 1,
            Self::Critical => 2,
            Self::Error => 3,
            Self::Warning => 4,
            Self::Notice => 5,
            Self::Info => 6,
        }
    }

    /// Whether records at this level are forwarded to the notification channel
    pub fn escalates(&self) -> bool {
        *self >= Self::Critical
    }

    /// Position in [`SeverityLevel::ALL`]
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
