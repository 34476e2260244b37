//! Service registry: maps a request type to its routing entry.
//!
//! Two strategies ship behind the [`ServiceRegistry`] contract:
//! - [`StaticServiceRegistry`]: explicit table, exact-match lookup
//! - [`ClusterDnsRegistry`]: derives an in-cluster address from the type name

pub mod cluster_dns;
pub mod static_table;

use conduit_core::{RequestType, ServiceEntry};

pub use cluster_dns::ClusterDnsRegistry;
pub use static_table::StaticServiceRegistry;

/// Routing table consulted by the endpoint resolver.
///
/// `lookup` must be a pure function of the request type and the registry's
/// registered state: no clocks, no randomness. Returning `None` means "not
/// found"; the resolver decides what that implies.
pub trait ServiceRegistry: Send + Sync {
    fn lookup(&self, request_type: RequestType) -> Option<ServiceEntry>;
}

/// Errors raised while populating a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("request type {request_type} is already registered")]
    AlreadyRegistered { request_type: String },

    #[error("request type name {name} is ambiguous: {existing} and {conflicting} share it")]
    AmbiguousName {
        name: String,
        existing: String,
        conflicting: String,
    },

    #[error("invalid cluster {field} {value:?}: {reason}")]
    InvalidClusterAddress {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}
