//! Severity classification
//!
//! The cascade is an ordered table of named rules. Rules are checked from
//! the most severe level down and the first match decides the level; a
//! request matching nothing is [`SeverityLevel::Info`]. Every predicate is a
//! plain function of its inputs, so classification is deterministic and each
//! rule can be exercised on its own.

use crate::config::SeverityThresholds;
use crate::rate_limit::RateLimitResult;
use crate::record::AuditRecord;
use crate::severity::SeverityLevel;

/// Predicate over one request's record, rate limit outcome and thresholds
pub type RulePredicate = fn(&AuditRecord, &RateLimitResult, &SeverityThresholds) -> bool;

/// One entry of the severity cascade
#[derive(Clone, Copy)]
pub struct SeverityRule {
    /// Stable rule name, e.g. `alert.gateway_status`
    pub name: &'static str,
    /// Level assigned when the predicate holds
    pub level: SeverityLevel,
    /// Condition
    pub predicate: RulePredicate,
}

impl std::fmt::Debug for SeverityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeverityRule")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// Status codes treated as server failures for the slow-error emergency rule
const SLOW_ERROR_STATUSES: [u16; 4] = [500, 502, 503, 504];
/// Status codes that raise an alert on their own
const ALERT_STATUSES: [u16; 3] = [500, 502, 503];

/// The cascade, most severe first
pub const RULES: &[SeverityRule] = &[
    SeverityRule {
        name: "emergency.rate_limit_flood",
        level: SeverityLevel::Emergency,
        predicate: |_, rl, t| rl.violation_count() > t.emergency_multiplier.saturating_mul(100),
    },
    SeverityRule {
        name: "emergency.response_time",
        level: SeverityLevel::Emergency,
        predicate: |r, _, t| r.response.response_time_ms > t.emergency_response_ms,
    },
    SeverityRule {
        name: "emergency.slow_server_error",
        level: SeverityLevel::Emergency,
        predicate: |r, _, t| {
            SLOW_ERROR_STATUSES.contains(&r.response.status_code)
                && r.response.response_time_ms > t.critical_error_response_ms
        },
    },
    SeverityRule {
        name: "alert.rate_limit_abuse",
        level: SeverityLevel::Alert,
        predicate: |_, rl, t| rl.violation_count() > t.alert_multiplier.saturating_mul(50),
    },
    SeverityRule {
        name: "alert.response_time",
        level: SeverityLevel::Alert,
        predicate: |r, _, t| r.response.response_time_ms > t.alert_response_ms,
    },
    SeverityRule {
        name: "alert.gateway_status",
        level: SeverityLevel::Alert,
        predicate: |r, _, _| ALERT_STATUSES.contains(&r.response.status_code),
    },
    SeverityRule {
        name: "critical.rate_limit_exceeded",
        level: SeverityLevel::Critical,
        predicate: |_, rl, _| rl.exceeded,
    },
    SeverityRule {
        name: "critical.response_time",
        level: SeverityLevel::Critical,
        predicate: |r, _, t| r.response.response_time_ms > t.critical_response_ms,
    },
    SeverityRule {
        name: "critical.memory",
        level: SeverityLevel::Critical,
        predicate: |r, _, t| r.memory_mb() > t.critical_memory_mb,
    },
    SeverityRule {
        name: "critical.admin_unauthorized",
        level: SeverityLevel::Critical,
        predicate: |r, _, t| {
            r.response.status_code == 401
                && is_admin_path(&r.request.path, &t.admin_path_segments)
        },
    },
    SeverityRule {
        name: "error.status",
        level: SeverityLevel::Error,
        predicate: |r, _, _| r.response.status_code >= 400,
    },
    SeverityRule {
        name: "warning.response_time",
        level: SeverityLevel::Warning,
        predicate: |r, _, t| r.response.response_time_ms > t.warning_response_ms,
    },
    SeverityRule {
        name: "warning.memory",
        level: SeverityLevel::Warning,
        predicate: |r, _, t| r.memory_mb() > t.warning_memory_mb,
    },
];

/// First matching rule, if any
pub fn matching_rule(
    record: &AuditRecord,
    rate_limit: &RateLimitResult,
    thresholds: &SeverityThresholds,
) -> Option<&'static SeverityRule> {
    RULES
        .iter()
        .find(|rule| (rule.predicate)(record, rate_limit, thresholds))
}

/// Classify one request/response cycle
pub fn classify(
    record: &AuditRecord,
    rate_limit: &RateLimitResult,
    thresholds: &SeverityThresholds,
) -> SeverityLevel {
    matching_rule(record, rate_limit, thresholds)
        .map(|rule| rule.level)
        .unwrap_or(SeverityLevel::Info)
}

/// Whether any whole path segment is an administrative segment
fn is_admin_path(path: &str, admin_segments: &[String]) -> bool {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .any(|segment| {
            admin_segments
                .iter()
                .any(|admin| admin.eq_ignore_ascii_case(segment))
        })
}

/// Classifier bound to a threshold configuration
#[derive(Debug, Clone, Default)]
pub struct SeverityClassifier {
    thresholds: SeverityThresholds,
}

impl SeverityClassifier {
    /// Create a classifier
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }

    /// Active thresholds
    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// The cascade in evaluation order
    pub fn rules(&self) -> &'static [SeverityRule] {
        RULES
    }

    /// Classify one request/response cycle
    pub fn classify(&self, record: &AuditRecord, rate_limit: &RateLimitResult) -> SeverityLevel {
        classify(record, rate_limit, &self.thresholds)
    }

    /// Name of the rule that decided the level, `None` for the info default
    pub fn explain(&self, record: &AuditRecord, rate_limit: &RateLimitResult) -> Option<&'static str> {
        matching_rule(record, rate_limit, &self.thresholds).map(|rule| rule.name)
    }
}
