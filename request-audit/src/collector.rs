//! Request and response data collection
//!
//! Builds the flat [`AuditRecord`] for one request/response cycle. Collection
//! never fails: a header that is missing or not valid UTF-8 simply leaves the
//! corresponding field empty.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, MatchedPath, Query, Request},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, USER_AGENT},
        HeaderMap, HeaderName,
    },
    response::Response,
};
use chrono::Utc;
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::memory::MemoryProbe;
use crate::record::{AuditRecord, RequestRecord, ResponseMetrics};

const REDACTED: &str = "[REDACTED]";
const UNKNOWN_IP: &str = "unknown";

/// Identity attached to the request by the host's authentication layer
///
/// Insert this as a request extension before the audit layer runs and the
/// record will carry `user_id` and be rate limited as `user:{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Stable user identifier
    pub id: String,
}

impl AuthenticatedUser {
    /// Create an identity
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Builds audit records from requests and responses
pub struct DataCollector {
    service_name: String,
    ip_headers: Vec<HeaderName>,
    session_cookie: String,
    redacted_params: HashSet<String>,
    memory: Arc<dyn MemoryProbe>,
}

impl DataCollector {
    /// Create a collector
    ///
    /// Header names that are not valid HTTP header names are skipped.
    pub fn new(
        service_name: impl Into<String>,
        config: &CollectorConfig,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        let ip_headers = config
            .ip_headers
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(header) => Some(header),
                Err(e) => {
                    tracing::warn!(header = %name, error = %e, "Ignoring invalid IP header name");
                    None
                }
            })
            .collect();

        Self {
            service_name: service_name.into(),
            ip_headers,
            session_cookie: config.session_cookie.clone(),
            redacted_params: config
                .redacted_query_params
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            memory,
        }
    }

    /// Capture the request-phase fields
    ///
    /// `route_params` are the matched path parameters; the caller extracts
    /// them because axum only exposes them through an async extractor.
    pub fn begin_request(
        &self,
        request: &Request<Body>,
        route_params: Vec<(String, String)>,
    ) -> RequestRecord {
        let headers = request.headers();
        let remote = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user = request.extensions().get::<AuthenticatedUser>();
        let content_type = header_str(headers, &CONTENT_TYPE).map(str::to_string);

        RequestRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service_name: self.service_name.clone(),
            request_id: header_str(headers, &HeaderName::from_static("x-request-id"))
                .map(str::to_string),
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            route_name: request
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string()),
            route_params,
            user_id: user.map(|u| u.id.clone()),
            ip_address: extract_client_ip(headers, &self.ip_headers, remote)
                .unwrap_or_else(|| UNKNOWN_IP.to_string()),
            user_agent: header_str(headers, &USER_AGENT).map(str::to_string),
            session_id: cookie_value(headers, &self.session_cookie),
            authenticated: user.is_some(),
            query_params: self.query_params(request),
            has_file_uploads: content_type
                .as_deref()
                .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
                .unwrap_or(false),
            content_type,
            request_size_bytes: declared_length(headers)
                .or_else(|| request.body().size_hint().exact())
                .unwrap_or(0),
        }
    }

    /// Complete the record with response-phase fields
    ///
    /// Elapsed time is measured from `started`, the instant captured when the
    /// request entered the pipeline.
    pub fn end_response(
        &self,
        request: RequestRecord,
        response: &Response,
        started: Instant,
    ) -> AuditRecord {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let response_size = declared_length(response.headers())
            .or_else(|| response.body().size_hint().exact());

        AuditRecord::new(
            request,
            ResponseMetrics::new(
                response.status().as_u16(),
                response_size,
                elapsed_ms,
                self.memory.memory_mb(),
            ),
        )
    }

    fn query_params(&self, request: &Request<Body>) -> BTreeMap<String, String> {
        let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) else {
            return BTreeMap::new();
        };

        pairs
            .into_iter()
            .map(|(key, value)| {
                if self.redacted_params.contains(&key.to_ascii_lowercase()) {
                    (key, REDACTED.to_string())
                } else {
                    (key, value)
                }
            })
            .collect()
    }
}

/// Resolve the client address from proxy headers, then the socket address
///
/// Headers are probed in the given order; the first non-empty value wins and
/// is cut down to the first element of a comma-separated list. RFC 7239
/// `Forwarded` values (`for=...`) are unwrapped.
pub fn extract_client_ip(
    headers: &HeaderMap,
    probe_order: &[HeaderName],
    remote: Option<SocketAddr>,
) -> Option<String> {
    probe_order
        .iter()
        .filter_map(|name| header_str(headers, name))
        .filter_map(first_forwarded_element)
        .next()
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

fn first_forwarded_element(value: &str) -> Option<String> {
    let first = value.split(',').next()?.trim();
    let first = first
        .split(';')
        .find_map(|part| {
            let part = part.trim();
            part.get(..4)
                .filter(|prefix| prefix.eq_ignore_ascii_case("for="))
                .map(|_| &part[4..])
        })
        .unwrap_or(first)
        .trim_matches('"');
    let first = strip_port(first);

    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Host part of `host`, `host:port`, `[v6]` or `[v6]:port`
///
/// A bare IPv6 address has several colons and is returned as is.
fn strip_port(value: &str) -> &str {
    if let Some(bracketed) = value.strip_prefix('[') {
        return bracketed.split_once(']').map_or(bracketed, |(host, _)| host);
    }
    match value.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => value,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, &CONTENT_LENGTH).and_then(|v| v.parse().ok())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}
