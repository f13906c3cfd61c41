//! Pipeline assembly
//!
//! Wires the collector, limiter, classifier and router together from a
//! [`Config`]. Any collaborator can be swapped through the builder.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::load()?;
//! let pipeline = AuditPipeline::from_config(&config).await?;
//! let events = pipeline.event_router().clone();
//!
//! let app = pipeline.apply(Router::new().route("/orders/{id}", get(show_order)));
//! ```

use std::sync::Arc;

use axum::Router;

use crate::classifier::SeverityClassifier;
use crate::collector::DataCollector;
use crate::config::Config;
use crate::error::Result;
use crate::interceptor::AuditInterceptor;
use crate::memory::{MemoryProbe, SysinfoProbe};
use crate::notify::{NotificationTransport, Notifier, WebhookTransport};
use crate::rate_limit::{CounterStore, MemoryCounterStore, RateLimiter};
use crate::router::EventRouter;
use crate::sink::SinkSet;

/// An assembled audit pipeline
#[derive(Clone, Debug)]
pub struct AuditPipeline {
    interceptor: AuditInterceptor,
}

impl AuditPipeline {
    /// Build every collaborator from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::builder().with_config(config.clone()).build().await
    }

    /// Builder with every collaborator defaulted from configuration
    pub fn builder() -> AuditPipelineBuilder {
        AuditPipelineBuilder::new()
    }

    /// The middleware state
    pub fn interceptor(&self) -> &AuditInterceptor {
        &self.interceptor
    }

    /// Router handle for ad-hoc events
    pub fn event_router(&self) -> &EventRouter {
        self.interceptor.event_router()
    }

    /// Install the interceptor in front of every route of `router`
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.interceptor.clone().apply(router)
    }
}

/// Builder for [`AuditPipeline`]
///
/// Unset collaborators are built from the configuration:
/// - counter store: Redis when configured (and the `cache` feature is on), else in-memory
/// - sinks: `sinks.kind` for every channel
/// - notification transport: webhook
/// - memory probe: process RSS sampled in the background via `sysinfo`
#[derive(Default)]
pub struct AuditPipelineBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn CounterStore>>,
    sinks: Option<SinkSet>,
    transport: Option<Arc<dyn NotificationTransport>>,
    memory: Option<Arc<dyn MemoryProbe>>,
}

impl AuditPipelineBuilder {
    /// Create a builder using `Config::default()` unless one is given
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific counter store
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use specific sinks
    pub fn with_sinks(mut self, sinks: SinkSet) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Use a specific notification transport
    pub fn with_notification_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a specific memory probe
    pub fn with_memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Assemble the pipeline
    ///
    /// Fails when the configuration is invalid or a required collaborator
    /// cannot be built: a non-optional Redis that is unreachable, or an
    /// invalid syslog address.
    pub async fn build(self) -> Result<AuditPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => counter_store(&config).await?,
        };
        let sinks = match self.sinks {
            Some(sinks) => sinks,
            None => SinkSet::from_config(&config.sinks)?,
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebhookTransport::new(config.notifications.timeout())));
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SysinfoProbe::start(config.collector.memory_sample_interval())));

        let service_name = config.service.name.clone();
        let interceptor = AuditInterceptor::new(
            DataCollector::new(service_name.clone(), &config.collector, memory),
            RateLimiter::new(
                store,
                config.rate_limit.windows.clone(),
                config.rate_limit.store_timeout(),
            ),
            SeverityClassifier::new(config.thresholds.clone()),
            EventRouter::new(
                service_name,
                sinks,
                Notifier::new(config.notifications.clone(), transport),
            ),
            &config.audit,
        );

        tracing::info!(
            service = %config.service.name,
            windows = config.rate_limit.windows.len(),
            notifications = config.notifications.is_active(),
            "Audit pipeline ready"
        );

        Ok(AuditPipeline { interceptor })
    }
}

async fn counter_store(config: &Config) -> Result<Arc<dyn CounterStore>> {
    #[cfg(feature = "cache")]
    {
        if let Some(redis) = &config.redis {
            match crate::cache::create_pool(redis).await {
                Ok(pool) => return Ok(Arc::new(crate::rate_limit::RedisCounterStore::new(pool))),
                Err(e) if redis.optional => {
                    tracing::warn!(
                        error = %e,
                        "Redis unavailable, falling back to in-memory counter store"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[cfg(not(feature = "cache"))]
    {
        if config.redis.is_some() {
            tracing::warn!("Redis configured without the `cache` feature, using in-memory counter store");
        }
    }

    Ok(Arc::new(MemoryCounterStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, RateLimitWindow, SinkKind};
    use crate::memory::DisabledProbe;
    use crate::notify::testing::RecordingTransport;
    use crate::severity::SeverityLevel;
    use crate::sink::{Channel, MemorySink};
    use axum::{body::Body, extract::Request, http::StatusCode, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-real-ip", "192.0.2.10")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_from_default_config() {
        let pipeline = AuditPipeline::from_config(&Config::default()).await.unwrap();
        assert!(pipeline.interceptor().should_audit("/orders"));
        assert!(!pipeline.interceptor().should_audit("/health"));
    }

    #[tokio::test]
    async fn test_invalid_syslog_address_fails_build() {
        let mut config = Config::default();
        config.sinks.kind = SinkKind::Syslog;
        config.sinks.syslog.address = "nowhere".to_string();

        assert!(AuditPipeline::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_length_window_fails_build() {
        let mut config = Config::default();
        config.rate_limit.windows = vec![RateLimitWindow::new(60, 60), RateLimitWindow::new(0, 5)];

        let err = AuditPipeline::from_config(&config).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[tokio::test]
    async fn test_admin_unauthorized_escalates_end_to_end() {
        let mut config = Config::default();
        config.service.name = "shop".to_string();
        config.notifications.default_endpoint = Some(EndpointConfig::new("https://hooks.example.com"));

        let sink = Arc::new(MemorySink::new());
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = AuditPipeline::builder()
            .with_config(config)
            .with_sinks(SinkSet::uniform(sink.clone()))
            .with_notification_transport(transport.clone())
            .with_memory_probe(Arc::new(DisabledProbe))
            .build()
            .await
            .unwrap();

        let app = pipeline.apply(
            Router::new().route("/admin/users", get(|| async { StatusCode::UNAUTHORIZED })),
        );
        let response = app.oneshot(request("/admin/users")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let critical = sink.entries_for(Channel::Severity(SeverityLevel::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].fields["service_name"], "shop");
        assert_eq!(critical[0].fields["ip_address"], "192.0.2.10");
        assert_eq!(transport.urls(), vec!["https://hooks.example.com"]);
    }

    #[tokio::test]
    async fn test_shared_store_across_pipelines() {
        let mut config = Config::default();
        config.rate_limit.windows = vec![RateLimitWindow::new(60, 1)];
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let sink = Arc::new(MemorySink::new());

        for _ in 0..2 {
            let pipeline = AuditPipeline::builder()
                .with_config(config.clone())
                .with_counter_store(store.clone())
                .with_sinks(SinkSet::uniform(sink.clone()))
                .with_memory_probe(Arc::new(DisabledProbe))
                .build()
                .await
                .unwrap();
            let app = pipeline.apply(Router::new().route("/", get(|| async { "ok" })));
            app.oneshot(request("/")).await.unwrap();
        }

        let analytics = sink.entries_for(Channel::RequestProcessed);
        assert_eq!(analytics[0].level, SeverityLevel::Info);
        assert_eq!(analytics[1].level, SeverityLevel::Critical);
    }

    #[tokio::test]
    async fn test_ad_hoc_events_use_pipeline_sinks() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = AuditPipeline::builder()
            .with_sinks(SinkSet::uniform(sink.clone()))
            .with_memory_probe(Arc::new(DisabledProbe))
            .build()
            .await
            .unwrap();

        pipeline
            .event_router()
            .emit(SeverityLevel::Warning, "Inventory sync lagging", Default::default())
            .await;

        assert_eq!(sink.entries_for(Channel::Severity(SeverityLevel::Warning)).len(), 1);
    }

    #[cfg(feature = "cache")]
    #[tokio::test]
    async fn test_optional_redis_falls_back_to_memory() {
        let mut config = Config::default();
        config.redis = Some(crate::config::RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            max_connections: 2,
            max_retries: 0,
            retry_delay_secs: 0,
            optional: true,
        });

        assert!(AuditPipeline::from_config(&config).await.is_ok());

        config.redis.as_mut().unwrap().optional = false;
        assert!(AuditPipeline::from_config(&config).await.is_err());
    }
}
