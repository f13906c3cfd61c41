//! Audit record types
//!
//! A request is recorded in two phases. [`RequestRecord`] holds everything
//! known before the handler runs; [`AuditRecord`] is produced by consuming it
//! together with the [`ResponseMetrics`] measured after the handler returns.
//! Neither phase can be revisited once the next one exists.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Request-phase fields, captured before the wrapped handler runs
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    /// Unique record identifier
    pub id: Uuid,
    /// When the request entered the pipeline
    pub timestamp: DateTime<Utc>,
    /// Name of the service that produced the record
    pub service_name: String,
    /// Correlation id from `x-request-id`, if the caller sent one
    pub request_id: Option<String>,
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Matched route template, e.g. `/api/products/{id}`
    pub route_name: Option<String>,
    /// Matched path parameters in route order
    #[serde(serialize_with = "serialize_pairs")]
    pub route_params: Vec<(String, String)>,
    /// Authenticated user id
    pub user_id: Option<String>,
    /// Client address after proxy header resolution
    pub ip_address: String,
    /// `User-Agent` header
    pub user_agent: Option<String>,
    /// Session cookie value
    pub session_id: Option<String>,
    /// Whether an authenticated identity was attached to the request
    pub authenticated: bool,
    /// Decoded query string, sensitive values redacted
    pub query_params: BTreeMap<String, String>,
    /// Whether the body is a multipart upload
    pub has_file_uploads: bool,
    /// `Content-Type` header
    pub content_type: Option<String>,
    /// Declared or exact body size
    pub request_size_bytes: u64,
}

impl RequestRecord {
    /// Rate-limit subject for this request: `user:{id}` or `ip:{address}`
    pub fn identity(&self) -> String {
        match (&self.user_id, self.authenticated) {
            (Some(id), true) => format!("user:{}", id),
            _ => format!("ip:{}", self.ip_address),
        }
    }
}

/// Response-phase fields, measured after the wrapped handler returns
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetrics {
    /// Final HTTP status
    pub status_code: u16,
    /// Response body size when known
    pub response_size_bytes: Option<u64>,
    /// Wall-clock time since the request phase began
    pub response_time_ms: u64,
    /// Resident memory of the process at the end of the request, if a probe could read it
    pub memory_peak_mb: Option<f64>,
    /// Bucketed response time
    pub response_time_category: ResponseTimeCategory,
    /// Bucketed status code
    pub status_category: StatusCategory,
    /// Bucketed memory usage
    pub memory_category: Option<MemoryCategory>,
}

impl ResponseMetrics {
    /// Build metrics and derive the categorical fields
    pub fn new(
        status_code: u16,
        response_size_bytes: Option<u64>,
        response_time_ms: u64,
        memory_peak_mb: Option<f64>,
    ) -> Self {
        Self {
            status_code,
            response_size_bytes,
            response_time_ms,
            memory_peak_mb,
            response_time_category: ResponseTimeCategory::from_millis(response_time_ms),
            status_category: StatusCategory::from_status(status_code),
            memory_category: memory_peak_mb.map(MemoryCategory::from_megabytes),
        }
    }
}

/// A complete request/response audit record
///
/// Serializes flat: request and response fields share one object.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Request-phase fields
    #[serde(flatten)]
    pub request: RequestRecord,
    /// Response-phase fields
    #[serde(flatten)]
    pub response: ResponseMetrics,
}

impl AuditRecord {
    /// Join both phases
    pub fn new(request: RequestRecord, response: ResponseMetrics) -> Self {
        Self { request, response }
    }

    /// Memory in MB, treating an unknown reading as zero
    pub fn memory_mb(&self) -> f64 {
        self.response.memory_peak_mb.unwrap_or(0.0)
    }
}

/// Response time buckets
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTimeCategory {
    /// Under 100ms
    Fast,
    /// Under 500ms
    Normal,
    /// Under 1s
    Slow,
    /// Under 5s
    VerySlow,
    /// 5s or more
    Critical,
}

impl ResponseTimeCategory {
    /// Bucket a response time in milliseconds
    pub fn from_millis(ms: u64) -> Self {
        match ms {
            0..=99 => Self::Fast,
            100..=499 => Self::Normal,
            500..=999 => Self::Slow,
            1000..=4999 => Self::VerySlow,
            _ => Self::Critical,
        }
    }
}

/// Status code classes
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    /// Below 300
    Success,
    /// 3xx
    Redirect,
    /// 4xx
    ClientError,
    /// 5xx and above
    ServerError,
}

impl StatusCategory {
    /// Classify a status code
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=299 => Self::Success,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            _ => Self::ServerError,
        }
    }
}

/// Memory usage buckets
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Under 64MB
    Low,
    /// Under 128MB
    Normal,
    /// Under 256MB
    High,
    /// Under 512MB
    VeryHigh,
    /// 512MB or more
    Critical,
}

impl MemoryCategory {
    /// Bucket a memory reading in megabytes
    pub fn from_megabytes(mb: f64) -> Self {
        if mb < 64.0 {
            Self::Low
        } else if mb < 128.0 {
            Self::Normal
        } else if mb < 256.0 {
            Self::High
        } else if mb < 512.0 {
            Self::VeryHigh
        } else {
            Self::Critical
        }
    }
}

fn serialize_pairs<S>(pairs: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(pairs.iter().map(|(k, v)| (k, v)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_time_boundaries() {
        assert_eq!(ResponseTimeCategory::from_millis(99), ResponseTimeCategory::Fast);
        assert_eq!(ResponseTimeCategory::from_millis(100), ResponseTimeCategory::Normal);
        assert_eq!(ResponseTimeCategory::from_millis(500), ResponseTimeCategory::Slow);
        assert_eq!(ResponseTimeCategory::from_millis(1000), ResponseTimeCategory::VerySlow);
        assert_eq!(ResponseTimeCategory::from_millis(5000), ResponseTimeCategory::Critical);
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(StatusCategory::from_status(204), StatusCategory::Success);
        assert_eq!(StatusCategory::from_status(301), StatusCategory::Redirect);
        assert_eq!(StatusCategory::from_status(404), StatusCategory::ClientError);
        assert_eq!(StatusCategory::from_status(500), StatusCategory::ServerError);
    }

    #[test]
    fn test_memory_boundaries() {
        assert_eq!(MemoryCategory::from_megabytes(63.9), MemoryCategory::Low);
        assert_eq!(MemoryCategory::from_megabytes(64.0), MemoryCategory::Normal);
        assert_eq!(MemoryCategory::from_megabytes(200.0), MemoryCategory::High);
        assert_eq!(MemoryCategory::from_megabytes(511.0), MemoryCategory::VeryHigh);
        assert_eq!(MemoryCategory::from_megabytes(512.0), MemoryCategory::Critical);
    }

    #[test]
    fn test_identity_prefers_authenticated_user() {
        let mut request = fixtures::request("/");
        assert_eq!(request.identity(), "ip:203.0.113.7");

        request.user_id = Some("42".to_string());
        request.authenticated = true;
        assert_eq!(request.identity(), "user:42");
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut request = fixtures::request("/products/9");
        request.route_params = vec![("product".to_string(), "9".to_string())];
        let record = AuditRecord::new(request, ResponseMetrics::new(200, Some(12), 40, None));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"], "/products/9");
        assert_eq!(json["status_code"], 200);
        assert_eq!(json["response_time_category"], "fast");
        assert_eq!(json["status_category"], "success");
        assert_eq!(json["route_params"]["product"], "9");
        assert!(json["memory_category"].is_null());
    }
}
