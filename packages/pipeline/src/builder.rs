//! Pipeline assembly.
//!
//! Without a configuration the builder produces a bare pipeline: only the
//! stages added with [`PipelineBuilder::interceptor`], local-only routing
//! unless a registry is supplied, and no remote transport unless one is
//! supplied. With [`PipelineBuilder::config`] every concern the
//! configuration enables is added at its reserved order; disabled concerns
//! are absent from the chain. The `cache_store`, `cache_keys`, `audit_sink`,
//! `telemetry` and `credentials` overrides replace the default backend of the
//! corresponding config-driven stage.

use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;

use crate::cache::{CacheKeyStrategy, CacheStore, InMemoryCacheStore};
use crate::chain::{Interceptor, InterceptorChain};
use crate::config::{ConfigError, PipelineConfig};
use crate::dispatch::{
    DispatchRouter, HandlerRegistry, HttpTransport, LocalDispatcher, RemoteDispatcher, Transport,
};
use crate::interceptors::{
    AuditInterceptor, AuditSink, CachingInterceptor, CircuitBreakerInterceptor,
    CorrelationInterceptor, CredentialProvider, LoadShedInterceptor, LoggingInterceptor,
    MetricsTelemetry, RetryInterceptor, SecurityInterceptor, StaticCredential, Telemetry,
    TelemetryInterceptor, TimeoutInterceptor, TracingAuditSink,
};
use crate::invoker::Pipeline;
use crate::registry::{ServiceRegistry, StaticServiceRegistry};
use crate::resolver::EndpointResolver;

#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    handlers: Option<Arc<HandlerRegistry>>,
    transport: Option<Arc<dyn Transport>>,
    stages: Vec<Arc<dyn Interceptor>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    cache_keys: Option<Arc<dyn CacheKeyStrategy>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Routing table; overrides the one the configuration describes.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Transport for remote calls. With a configuration and no explicit
    /// transport, an [`HttpTransport`] is created.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Adds a custom stage at its own order.
    #[must_use]
    pub fn interceptor(mut self, stage: Arc<dyn Interceptor>) -> Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    #[must_use]
    pub fn cache_keys(mut self, keys: Arc<dyn CacheKeyStrategy>) -> Self {
        self.cache_keys = Some(keys);
        self
    }

    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Credential source; with a configuration this enables the security
    /// stage even when no bearer token is configured.
    #[must_use]
    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid routes, an unparsable correlation
    /// header, an invalid bearer token, or an HTTP client that cannot be
    /// initialized.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let defaults = PipelineConfig::default();
        let config = self.config.as_ref();
        let transport_config = config.map_or(&defaults.transport, |c| &c.transport);

        let registry = match (self.registry.clone(), config) {
            (Some(registry), _) => registry,
            (None, Some(config)) => config.build_registry()?,
            (None, None) => Arc::new(StaticServiceRegistry::new()),
        };

        let transport = match (self.transport.clone(), config) {
            (Some(transport), _) => Some(transport),
            (None, Some(_)) => Some(Arc::new(HttpTransport::new(Duration::from_millis(
                transport_config.request_timeout_ms,
            ))?) as Arc<dyn Transport>),
            (None, None) => None,
        };
        let remote = transport.map(|transport| {
            RemoteDispatcher::new(transport)
                .with_format(transport_config.wire_format)
                .with_path_prefix(&transport_config.path_prefix)
        });

        let handlers = self.handlers.clone().unwrap_or_default();
        let router = DispatchRouter::new(LocalDispatcher::new(Arc::clone(&handlers)), remote);

        let mut stages = match config {
            Some(config) => self.configured_stages(config)?,
            None => Vec::new(),
        };
        stages.extend(self.stages.iter().cloned());
        let chain = InterceptorChain::new(stages);

        tracing::info!(
            node = config.map_or("conduit", |c| c.node_name.as_str()),
            stages = ?chain.describe(),
            "pipeline assembled"
        );

        Ok(Pipeline::from_parts(
            EndpointResolver::new(registry),
            chain,
            router,
            handlers,
            transport_config.path_prefix.clone(),
        ))
    }

    fn configured_stages(
        &self,
        config: &PipelineConfig,
    ) -> Result<Vec<Arc<dyn Interceptor>>, ConfigError> {
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::new();

        let credentials = match (&self.credentials, &config.security.bearer_token) {
            (Some(provider), _) => Some(Arc::clone(provider)),
            (None, Some(token)) => Some(Arc::new(
                StaticCredential::bearer(token)
                    .map_err(|err| ConfigError::InvalidCredential(err.to_string()))?,
            ) as Arc<dyn CredentialProvider>),
            (None, None) => None,
        };
        if let Some(provider) = credentials {
            stages.push(Arc::new(SecurityInterceptor::new(provider)));
        }

        if config.max_concurrent_calls > 0 {
            stages.push(Arc::new(LoadShedInterceptor::new(config.max_concurrent_calls)));
        }

        if config.telemetry.enabled {
            let telemetry = self
                .telemetry
                .clone()
                .unwrap_or_else(|| Arc::new(MetricsTelemetry));
            stages.push(Arc::new(TelemetryInterceptor::new(telemetry)));
        }

        if config.correlation.enabled {
            let header = HeaderName::from_bytes(config.correlation.header.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(config.correlation.header.clone()))?;
            stages.push(Arc::new(CorrelationInterceptor::new(header)));
        }

        if config.logging.log_calls {
            stages.push(Arc::new(LoggingInterceptor::new()));
        }

        if config.cache.enabled {
            let store = self
                .cache_store
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new(config.cache.capacity)));
            let mut caching = CachingInterceptor::new(store, config.cache.ttl())
                .with_failure_policy(config.cache.on_failure);
            if let Some(keys) = &self.cache_keys {
                caching = caching.with_key_strategy(Arc::clone(keys));
            }
            stages.push(Arc::new(caching));
        }

        if config.circuit_breaker.enabled {
            stages.push(Arc::new(CircuitBreakerInterceptor::new(
                config.circuit_breaker.failure_threshold.max(1),
                Duration::from_millis(config.circuit_breaker.open_duration_ms),
            )));
        }

        stages.push(Arc::new(TimeoutInterceptor::new(config.default_timeout())));

        if config.retry.enabled && config.retry.max_attempts > 1 {
            stages.push(Arc::new(RetryInterceptor::new(config.retry.policy())));
        }

        if config.audit.enabled {
            let sink = self
                .audit_sink
                .clone()
                .unwrap_or_else(|| Arc::new(TracingAuditSink));
            stages.push(Arc::new(AuditInterceptor::new(sink)));
        }

        Ok(stages)
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("configured", &self.config.is_some())
            .field("custom_stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}
