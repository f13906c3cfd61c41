//! Request interceptor
//!
//! Wraps request handling in a fixed sequence of phases:
//!
//! ```text
//! Start -> CollectingRequest -> HandlerRunning -> CollectingResponse
//!       -> Classifying -> Routing -> Done
//! ```
//!
//! The interceptor is observational. The response the handler produced is
//! returned unchanged; only a panic or a configured timeout replaces it with
//! a synthetic 500 or 504, which is audited like any other response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{RawPathParams, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    RequestPartsExt, Router,
};
use futures::FutureExt;

use crate::classifier::SeverityClassifier;
use crate::collector::DataCollector;
use crate::config::AuditConfig;
use crate::rate_limit::RateLimiter;
use crate::router::EventRouter;

/// Phase of one intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Clock captured
    Start,
    /// Request fields collected and rate limit evaluated
    CollectingRequest,
    /// Control handed to the wrapped handler
    HandlerRunning,
    /// Response fields collected
    CollectingResponse,
    /// Severity being computed
    Classifying,
    /// Entries being dispatched
    Routing,
    /// Terminal
    Done,
}

impl Phase {
    /// The only phase that may follow this one
    pub fn successor(self) -> Option<Phase> {
        match self {
            Self::Start => Some(Self::CollectingRequest),
            Self::CollectingRequest => Some(Self::HandlerRunning),
            Self::HandlerRunning => Some(Self::CollectingResponse),
            Self::CollectingResponse => Some(Self::Classifying),
            Self::Classifying => Some(Self::Routing),
            Self::Routing => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Phase name for diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::CollectingRequest => "collecting_request",
            Self::HandlerRunning => "handler_running",
            Self::CollectingResponse => "collecting_response",
            Self::Classifying => "classifying",
            Self::Routing => "routing",
            Self::Done => "done",
        }
    }
}

/// Tracks the phase of one request; it can only move to the successor
#[derive(Debug)]
pub struct PhaseTracker {
    phase: Phase,
}

impl PhaseTracker {
    /// Tracker in [`Phase::Start`]
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
        }
    }

    /// Current phase
    pub fn current(&self) -> Phase {
        self.phase
    }

    /// Move to the successor phase and return it. `Done` stays `Done`.
    pub fn advance(&mut self) -> Phase {
        if let Some(next) = self.phase.successor() {
            tracing::trace!(from = self.phase.as_str(), to = next.as_str(), "Audit phase transition");
            self.phase = next;
        }
        self.phase
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    collector: DataCollector,
    limiter: RateLimiter,
    classifier: SeverityClassifier,
    router: EventRouter,
    enabled: bool,
    excluded_routes: Vec<String>,
    handler_timeout: Option<Duration>,
}

/// The audit middleware state, cheap to clone
#[derive(Clone)]
pub struct AuditInterceptor {
    inner: Arc<Inner>,
}

impl AuditInterceptor {
    /// Assemble an interceptor from its collaborators
    pub fn new(
        collector: DataCollector,
        limiter: RateLimiter,
        classifier: SeverityClassifier,
        router: EventRouter,
        config: &AuditConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collector,
                limiter,
                classifier,
                router,
                enabled: config.enabled,
                excluded_routes: config.excluded_routes.clone(),
                handler_timeout: config.handler_timeout(),
            }),
        }
    }

    /// Router used for request events, also usable for ad-hoc events
    pub fn event_router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Whether a request to `path` goes through the pipeline
    pub fn should_audit(&self, path: &str) -> bool {
        self.inner.enabled && !path_matches_patterns(path, &self.inner.excluded_routes)
    }

    /// Install the interceptor in front of every route of `router`
    ///
    /// Routes added after this call are not audited.
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, intercept))
    }

    async fn run_handler(&self, request: Request<Body>, next: Next) -> Response {
        let handler = AssertUnwindSafe(next.run(request)).catch_unwind();

        let outcome = match self.inner.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "Handler timed out, auditing as 504"
                    );
                    return StatusCode::GATEWAY_TIMEOUT.into_response();
                }
            },
            None => handler.await,
        };

        outcome.unwrap_or_else(|_| {
            tracing::warn!("Handler panicked, auditing as 500");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
    }
}

impl std::fmt::Debug for AuditInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditInterceptor")
            .field("enabled", &self.inner.enabled)
            .field("excluded_routes", &self.inner.excluded_routes)
            .field("handler_timeout", &self.inner.handler_timeout)
            .finish_non_exhaustive()
    }
}

/// Audit middleware
///
/// Install with [`AuditInterceptor::apply`] or directly:
///
/// ```rust,ignore
/// Router::new()
///     .route("/orders/{id}", get(show_order))
///     .layer(axum::middleware::from_fn_with_state(interceptor, intercept))
/// ```
pub async fn intercept(
    State(interceptor): State<AuditInterceptor>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !interceptor.should_audit(request.uri().path()) {
        return next.run(request).await;
    }

    let inner = &interceptor.inner;
    let mut phase = PhaseTracker::new();
    let started = Instant::now();

    phase.advance();
    let (mut parts, body) = request.into_parts();
    let route_params = match parts.extract::<RawPathParams>().await {
        Ok(params) => params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let request = Request::from_parts(parts, body);
    let pending = inner.collector.begin_request(&request, route_params);
    let rate_limit = inner.limiter.check(&pending.identity()).await;

    phase.advance();
    let response = interceptor.run_handler(request, next).await;

    phase.advance();
    let record = inner.collector.end_response(pending, &response, started);

    phase.advance();
    let level = inner.classifier.classify(&record, &rate_limit);

    phase.advance();
    inner.router.route(&record, &rate_limit, level).await;

    phase.advance();
    debug_assert_eq!(phase.current(), Phase::Done);
    response
}

/// Check if a path matches any of the given glob patterns
///
/// Patterns are compared segment by segment:
/// - `*` matches exactly one path segment
/// - `**` matches zero or more segments
/// - any other segment must match literally
///
/// Empty segments are ignored, so `/internal/` and `/internal` are the same.
pub fn path_matches_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| path_matches_glob(path, pattern))
}

fn path_matches_glob(path: &str, pattern: &str) -> bool {
    let path: Vec<&str> = segments(path).collect();
    let pattern: Vec<&str> = segments(pattern).collect();
    segments_match(&path, &pattern)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn segments_match(path: &[&str], pattern: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| segments_match(&path[skip..], rest)),
        Some((&expected, rest)) => match path.split_first() {
            Some((&actual, remaining)) => {
                (expected == "*" || expected == actual) && segments_match(remaining, rest)
            }
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::AuthenticatedUser;
    use crate::config::{CollectorConfig, RateLimitWindow};
    use crate::memory::DisabledProbe;
    use crate::notify::Notifier;
    use crate::rate_limit::MemoryCounterStore;
    use crate::severity::SeverityLevel;
    use crate::config::{EndpointConfig, NotificationConfig};
    use crate::notify::testing::RecordingTransport;
    use crate::sink::{AuditSink, Channel, LogEntry, MemorySink, SinkSet};
    use axum::{routing::get, Extension};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn interceptor(sink: Arc<MemorySink>, windows: Vec<RateLimitWindow>, config: AuditConfig) -> AuditInterceptor {
        interceptor_with(SinkSet::uniform(sink), Notifier::disabled(), windows, config)
    }

    fn interceptor_with(
        sinks: SinkSet,
        notifier: Notifier,
        windows: Vec<RateLimitWindow>,
        config: AuditConfig,
    ) -> AuditInterceptor {
        AuditInterceptor::new(
            DataCollector::new("shop", &CollectorConfig::default(), Arc::new(DisabledProbe)),
            RateLimiter::new(
                Arc::new(MemoryCounterStore::new()),
                windows,
                Duration::from_millis(250),
            ),
            SeverityClassifier::default(),
            EventRouter::new("shop", sinks, notifier),
            &config,
        )
    }

    /// Never finishes a write
    struct HangingSink;

    #[async_trait::async_trait]
    impl AuditSink for HangingSink {
        async fn write(&self, _entry: &LogEntry) -> crate::error::Result<()> {
            futures::future::pending().await
        }
    }

    /// Rejects every write
    #[derive(Default)]
    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AuditSink for FailingSink {
        async fn write(&self, entry: &LogEntry) -> crate::error::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::Error::sink(entry.channel.name(), "disk full"))
        }
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn show_order() -> (StatusCode, &'static str) {
        (StatusCode::CREATED, "order")
    }

    async fn boom() -> &'static str {
        panic!("handler exploded")
    }

    async fn stall() -> &'static str {
        tokio::time::sleep(Duration::from_millis(500)).await;
        "late"
    }

    fn app(interceptor: AuditInterceptor) -> Router {
        interceptor.apply(
            Router::new()
                .route("/orders/{id}", get(show_order))
                .route("/boom", get(boom))
                .route("/stall", get(stall))
                .route("/health", get(|| async { "ok" })),
        )
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_phase_tracker_walks_every_phase() {
        let mut tracker = PhaseTracker::new();
        let mut seen = vec![tracker.current()];
        while tracker.current() != Phase::Done {
            seen.push(tracker.advance());
        }
        assert_eq!(
            seen,
            vec![
                Phase::Start,
                Phase::CollectingRequest,
                Phase::HandlerRunning,
                Phase::CollectingResponse,
                Phase::Classifying,
                Phase::Routing,
                Phase::Done,
            ]
        );
        assert_eq!(tracker.advance(), Phase::Done);
    }

    #[tokio::test]
    async fn test_response_passes_through_unchanged() {
        let sink = Arc::new(MemorySink::new());
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], AuditConfig::default()));

        let response = app.oneshot(get_request("/orders/42?token=abc&page=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"order");

        let info = sink.entries_for(Channel::Severity(SeverityLevel::Info));
        assert_eq!(info.len(), 1);
        let fields = &info[0].fields;
        assert_eq!(fields["method"], "GET");
        assert_eq!(fields["path"], "/orders/42");
        assert_eq!(fields["route_name"], "/orders/{id}");
        assert_eq!(fields["route_params"]["id"], "42");
        assert_eq!(fields["ip_address"], "198.51.100.4");
        assert_eq!(fields["status_code"], 201);
        assert_eq!(fields["query_params"]["page"], "2");
        assert_eq!(fields["query_params"]["token"], "[REDACTED]");
        assert_eq!(sink.entries_for(Channel::RequestProcessed).len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_escalates_to_critical() {
        let sink = Arc::new(MemorySink::new());
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 2)], AuditConfig::default()));

        for _ in 0..3 {
            let response = app.clone().oneshot(get_request("/orders/1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        assert_eq!(sink.entries_for(Channel::Severity(SeverityLevel::Info)).len(), 2);
        let critical = sink.entries_for(Channel::Severity(SeverityLevel::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "GET /orders/1 - Rate limit exceeded (3 requests)");
    }

    #[tokio::test]
    async fn test_authenticated_user_is_the_rate_limit_identity() {
        let sink = Arc::new(MemorySink::new());
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], AuditConfig::default()))
            .layer(Extension(AuthenticatedUser::new("u-17")));

        app.oneshot(get_request("/orders/1")).await.unwrap();

        let entry = &sink.entries_for(Channel::RequestProcessed)[0];
        assert_eq!(entry.fields["user_id"], "u-17");
        assert_eq!(entry.fields["authenticated"], true);
        assert_eq!(entry.fields["rate_limit"]["identity"], "user:u-17");
    }

    #[tokio::test]
    async fn test_excluded_routes_are_not_audited() {
        let sink = Arc::new(MemorySink::new());
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], AuditConfig::default()));

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_is_pass_through() {
        let sink = Arc::new(MemorySink::new());
        let config = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], config));

        let response = app.oneshot(get_request("/orders/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_audited_as_500() {
        let sink = Arc::new(MemorySink::new());
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], AuditConfig::default()));

        let response = app.oneshot(get_request("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let alerts = sink.entries_for(Channel::Severity(SeverityLevel::Alert));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].fields["status_code"], 500);
        assert_eq!(alerts[0].message, "GET /boom - HTTP 500");
    }

    #[tokio::test]
    async fn test_timeout_is_audited_as_504() {
        let sink = Arc::new(MemorySink::new());
        let config = AuditConfig {
            handler_timeout_ms: Some(20),
            ..AuditConfig::default()
        };
        let app = app(interceptor(sink.clone(), vec![RateLimitWindow::new(60, 60)], config));

        let response = app.oneshot(get_request("/stall")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let analytics = sink.entries_for(Channel::RequestProcessed);
        assert_eq!(analytics.len(), 1);
        assert_eq!(analytics[0].fields["status_code"], 504);
        assert_eq!(analytics[0].level, SeverityLevel::Error);
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_hold_the_response() {
        let sinks = SinkSet::uniform(Arc::new(HangingSink))
            .with_write_timeout(Duration::from_millis(50));
        let app = app(interceptor_with(
            sinks,
            Notifier::disabled(),
            vec![RateLimitWindow::new(60, 60)],
            AuditConfig::default(),
        ));

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            app.oneshot(get_request("/orders/7")),
        )
        .await
        .expect("response held by a stalled sink")
        .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_text(response).await, "order");
    }

    #[tokio::test]
    async fn test_sink_and_transport_failures_leave_response_untouched() {
        let failing = Arc::new(FailingSink::default());
        let transport = Arc::new(RecordingTransport::failing());
        let notifications = NotificationConfig {
            default_endpoint: Some(EndpointConfig::new("https://hooks.example.com/audit")),
            ..Default::default()
        };
        let app = app(interceptor_with(
            SinkSet::uniform(failing.clone()),
            Notifier::new(notifications, transport.clone()),
            vec![RateLimitWindow::new(60, 60)],
            AuditConfig::default(),
        ));

        let response = app.clone().oneshot(get_request("/orders/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_text(response).await, "order");

        // A 500 escalates, so the failing transport is exercised too
        let response = app.oneshot(get_request("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 4);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_path_matches_exact() {
        assert!(path_matches_glob("/api/v1/users", "/api/v1/users"));
        assert!(!path_matches_glob("/api/v1/users", "/api/v1/posts"));
    }

    #[test]
    fn test_path_matches_wildcards() {
        assert!(path_matches_glob("/internal/metrics", "/internal/*"));
        assert!(!path_matches_glob("/internal", "/internal/*"));
        assert!(path_matches_glob("/internal", "/internal/**"));
        assert!(path_matches_glob("/internal/a/b", "/internal/**"));
        assert!(path_matches_glob("/users/9/avatar", "/users/*/avatar"));
        assert!(!path_matches_glob("/users/avatar", "/users/*/avatar"));
        assert!(path_matches_glob("/api/v2/internal/stats", "/api/**/stats"));
    }

    #[test]
    fn test_wildcards_match_whole_segments() {
        assert!(!path_matches_glob("/users/a/b/avatar", "/users/*/avatar"));
        assert!(!path_matches_glob("/internal/a/b", "/internal/*"));
        assert!(!path_matches_glob("/internalx", "/internal/**"));
        assert!(!path_matches_glob("/internalx/metrics", "/internal/*"));
        assert!(path_matches_glob("/internal/", "/internal"));
    }

    #[test]
    fn test_default_exclusions() {
        let patterns = AuditConfig::default().excluded_routes;
        assert!(path_matches_patterns("/health", &patterns));
        assert!(path_matches_patterns("/ready", &patterns));
        assert!(!path_matches_patterns("/orders", &patterns));
    }
}
