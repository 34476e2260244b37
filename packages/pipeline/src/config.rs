//! Pipeline configuration.
//!
//! Every section has documented defaults, so an empty JSON object is a valid
//! configuration: local-only routing, correlation, logging, telemetry and
//! audit on, cache and circuit breaker off.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conduit_core::ServiceEntry;
use http::Uri;
use serde::Deserialize;

use crate::dispatch::{TransportError, WireFormat};
use crate::interceptors::{CacheFailurePolicy, RetryPolicy};
use crate::registry::{ClusterDnsRegistry, RegistryError, ServiceRegistry, StaticServiceRegistry};

/// Errors raised while loading configuration or assembling a pipeline from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("route for {request_type}: invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        request_type: String,
        endpoint: String,
        reason: String,
    },

    #[error("invalid correlation header {0:?}")]
    InvalidHeader(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("transport initialization failed: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for one pipeline instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name of this node, attached to log output.
    pub node_name: String,
    /// Per-call time budget when the caller supplies none.
    pub default_timeout_ms: u64,
    /// Calls allowed in flight before load shedding.
    pub max_concurrent_calls: usize,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub transport: TransportConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub audit: ToggleConfig,
    pub telemetry: ToggleConfig,
    pub correlation: CorrelationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            node_name: "conduit".to_string(),
            default_timeout_ms: 30_000,
            max_concurrent_calls: 1000,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            transport: TransportConfig::default(),
            routing: RoutingConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
            audit: ToggleConfig::default(),
            telemetry: ToggleConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON or unknown enum values
    /// (e.g. an unrecognized routing strategy).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, or
    /// `ConfigError::Parse` if it is not valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Builds the service registry described by the `routing` section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEndpoint` for a route whose endpoint is
    /// not a valid URI, or `ConfigError::Registry` for duplicate routes and
    /// invalid cluster DNS settings.
    pub fn build_registry(&self) -> Result<Arc<dyn ServiceRegistry>, ConfigError> {
        self.routing.build_registry()
    }
}

/// Retry backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime; `0` means entries never expire.
    pub ttl_secs: u64,
    /// Maximum entries held by the in-memory store.
    pub capacity: usize,
    pub on_failure: CacheFailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 60,
            capacity: 10_000,
            on_failure: CacheFailurePolicy::Fail,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing.
    pub open_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

/// Remote dispatch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path segment placed between the service base URI and the operation.
    pub path_prefix: String,
    pub wire_format: WireFormat,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/dispatch".to_string(),
            wire_format: WireFormat::Json,
            request_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Explicit route table; unlisted types run locally.
    #[default]
    Static,
    /// Every type maps to an in-cluster service derived from its name.
    ClusterDns,
}

/// One explicit route.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub request_type: String,
    pub service_name: String,
    pub endpoint: String,
    /// Registered but served in-process.
    #[serde(default)]
    pub local: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
    pub routes: Vec<RouteConfig>,
    pub cluster_namespace: String,
    pub cluster_port: u16,
    pub cluster_scheme: String,
    pub cluster_domain: String,
    pub strip_suffixes: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Static,
            routes: Vec::new(),
            cluster_namespace: "default".to_string(),
            cluster_port: 80,
            cluster_scheme: "http".to_string(),
            cluster_domain: "svc.cluster.local".to_string(),
            strip_suffixes: vec![
                "Request".to_string(),
                "Command".to_string(),
                "Query".to_string(),
            ],
        }
    }
}

impl RoutingConfig {
    /// # Errors
    ///
    /// See [`PipelineConfig::build_registry`].
    pub fn build_registry(&self) -> Result<Arc<dyn ServiceRegistry>, ConfigError> {
        match self.strategy {
            RoutingStrategy::ClusterDns => Ok(Arc::new(
                ClusterDnsRegistry::new(self.cluster_namespace.clone())?
                    .with_scheme(self.cluster_scheme.clone())?
                    .with_cluster_domain(self.cluster_domain.clone())?
                    .with_port(self.cluster_port)
                    .with_suffixes(self.strip_suffixes.clone()),
            )),
            RoutingStrategy::Static => {
                let registry = StaticServiceRegistry::new();
                for route in &self.routes {
                    let endpoint: Uri =
                        route
                            .endpoint
                            .parse()
                            .map_err(|err: http::uri::InvalidUri| ConfigError::InvalidEndpoint {
                                request_type: route.request_type.clone(),
                                endpoint: route.endpoint.clone(),
                                reason: err.to_string(),
                            })?;
                    if endpoint.scheme().is_none() || endpoint.authority().is_none() {
                        return Err(ConfigError::InvalidEndpoint {
                            request_type: route.request_type.clone(),
                            endpoint: route.endpoint.clone(),
                            reason: "endpoint must be an absolute URI".to_string(),
                        });
                    }
                    let entry = if route.local {
                        ServiceEntry::local(route.service_name.clone(), endpoint)
                    } else {
                        ServiceEntry::remote(route.service_name.clone(), endpoint)
                    };
                    registry.register_name(route.request_type.clone(), entry)?;
                }
                Ok(Arc::new(registry))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Observability and cross-cutting toggles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the per-call logging interceptor in the chain.
    pub log_calls: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_calls: true,
        }
    }
}

/// Outbound credentials. No token means no security stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub enabled: bool,
    pub header: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: crate::interceptors::correlation::CORRELATION_HEADER.to_string(),
        }
    }
}
