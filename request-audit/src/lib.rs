//! # request-audit
//!
//! Request audit and adaptive rate-limit observation for axum services.
//!
//! Every request that passes the audit layer produces one structured
//! [`AuditRecord`](record::AuditRecord), is counted against a set of fixed
//! rate-limit windows, gets exactly one [`SeverityLevel`](severity::SeverityLevel)
//! and is written to the sink for that level plus an analytics sink. Severe
//! events are also forwarded to a notification endpoint.
//!
//! The pipeline is observational: it never rejects a request and never
//! changes a response. Failures inside it are logged and contained.
//!
//! ## Features
//!
//! - **Collection**: method, route, caller identity, proxy-aware client IP,
//!   query parameters (redacted), sizes, timing and process memory
//! - **Rate limiting**: multiple fixed windows over an atomic counter store
//!   (in-memory, or Redis with the `cache` feature); fails open
//! - **Classification**: an ordered rule table mapping records to severities
//! - **Routing**: per-severity sinks (`tracing` or RFC 5424 syslog) and
//!   webhook escalation for critical, alert and emergency
//!
//! ## Example
//!
//! ```rust,no_run
//! use request_audit::prelude::*;
//! use axum::{routing::get, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let pipeline = AuditPipeline::from_config(&config).await?;
//!     let app = pipeline.apply(Router::new().route("/orders/{id}", get(|| async { "order" })));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod collector;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod rate_limit;
pub mod record;
pub mod router;
pub mod severity;
pub mod sink;

#[cfg(feature = "cache")]
pub mod cache;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::classifier::{SeverityClassifier, SeverityRule};
    pub use crate::collector::{extract_client_ip, AuthenticatedUser, DataCollector};
    pub use crate::config::{
        AuditConfig, CollectorConfig, Config, EndpointConfig, NotificationConfig,
        RateLimitConfig, RateLimitWindow, SeverityThresholds, SinkConfig, SinkKind,
    };
    pub use crate::error::{Error, Result};
    pub use crate::interceptor::{intercept, AuditInterceptor, Phase, PhaseTracker};
    pub use crate::memory::{DisabledProbe, MemoryGauge, MemoryProbe, SysinfoProbe};
    pub use crate::notify::{Notification, NotificationTransport, Notifier, WebhookTransport};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{AuditPipeline, AuditPipelineBuilder};
    pub use crate::rate_limit::{
        CounterStore, CounterValue, MemoryCounterStore, RateLimitResult, RateLimiter,
        WindowEvaluation,
    };
    pub use crate::record::{AuditRecord, RequestRecord, ResponseMetrics};
    pub use crate::router::EventRouter;
    pub use crate::severity::SeverityLevel;
    pub use crate::sink::{AuditSink, Channel, LogEntry, MemorySink, SinkSet, SyslogSink, TracingSink};

    #[cfg(feature = "cache")]
    pub use crate::rate_limit::RedisCounterStore;
}
