//! Endpoint resolution with per-request-type memoization.

use std::sync::Arc;

use conduit_core::{EndpointResolution, RequestType};
use dashmap::DashMap;

use crate::registry::ServiceRegistry;

/// Decides whether a request type is served locally or forwarded.
///
/// Decisions are memoized per request type for the resolver's lifetime. The
/// read path is a sharded `DashMap` lookup with no global lock. On a miss the
/// registry is consulted outside any shard lock, so concurrent first callers
/// for the same type may each run the lookup; the first insert wins and every
/// caller returns the stored value.
///
/// A type with no registry entry resolves to [`EndpointResolution::Local`].
pub struct EndpointResolver {
    registry: Arc<dyn ServiceRegistry>,
    resolved: DashMap<RequestType, EndpointResolution>,
}

impl EndpointResolver {
    #[must_use]
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            resolved: DashMap::new(),
        }
    }

    /// Resolves `request_type`, consulting the registry at most once per type
    /// in the absence of races.
    pub fn resolve(&self, request_type: RequestType) -> EndpointResolution {
        if let Some(hit) = self.resolved.get(&request_type) {
            return hit.value().clone();
        }

        let computed = match self.registry.lookup(request_type) {
            Some(entry) => entry.to_resolution(),
            None => {
                tracing::debug!(
                    request_type = request_type.name(),
                    "no route registered, executing locally"
                );
                EndpointResolution::Local
            }
        };

        let stored = self
            .resolved
            .entry(request_type)
            .or_insert(computed)
            .value()
            .clone();

        tracing::debug!(
            request_type = request_type.name(),
            local = stored.is_local(),
            service = stored.service_name().unwrap_or("-"),
            "endpoint resolved"
        );
        stored
    }

    /// Number of memoized resolutions.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.resolved.len()
    }
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("resolved", &self.resolved.len())
            .finish_non_exhaustive()
    }
}
