//! Cluster DNS convention: every request type maps to an in-cluster service.

use conduit_core::{RequestType, ServiceEntry};
use http::Uri;

use super::{RegistryError, ServiceRegistry};

/// Convention-based registry for in-cluster services.
///
/// The service name is derived from the request type name: the first matching
/// conventional suffix (`Request`, `Command`, `Query` by default) is stripped,
/// the rest is lowercased and every character outside `[a-z0-9]` becomes `-`.
/// `GetUserRequest` in namespace `prod` maps to
/// `http://getuser.prod.svc.cluster.local:80`.
///
/// Scheme, namespace and cluster domain are validated when set, so every
/// derived address is a valid URI and every type is reported as remote.
#[derive(Debug, Clone)]
pub struct ClusterDnsRegistry {
    namespace: String,
    scheme: String,
    port: u16,
    cluster_domain: String,
    suffixes: Vec<String>,
}

impl ClusterDnsRegistry {
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidClusterAddress` if `namespace` is not a
    /// DNS label (lowercase alphanumerics and `-`, at most 63 characters).
    pub fn new(namespace: impl Into<String>) -> Result<Self, RegistryError> {
        let namespace = namespace.into();
        check_label("namespace", &namespace, &namespace)?;
        Ok(Self {
            namespace,
            scheme: "http".to_string(),
            port: 80,
            cluster_domain: "svc.cluster.local".to_string(),
            suffixes: vec![
                "Request".to_string(),
                "Command".to_string(),
                "Query".to_string(),
            ],
        })
    }

    /// # Errors
    ///
    /// Returns `RegistryError::InvalidClusterAddress` unless `scheme` is
    /// `http` or `https`.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Result<Self, RegistryError> {
        let scheme = scheme.into();
        if scheme != "http" && scheme != "https" {
            return Err(RegistryError::InvalidClusterAddress {
                field: "scheme",
                value: scheme,
                reason: "must be http or https",
            });
        }
        self.scheme = scheme;
        Ok(self)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// # Errors
    ///
    /// Returns `RegistryError::InvalidClusterAddress` unless every
    /// dot-separated part of `domain` is a DNS label.
    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Result<Self, RegistryError> {
        let domain = domain.into();
        for label in domain.split('.') {
            check_label("cluster domain", label, &domain)?;
        }
        self.cluster_domain = domain;
        Ok(self)
    }

    #[must_use]
    pub fn with_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.suffixes = suffixes;
        self
    }

    /// Derives the service name for a request type name.
    #[must_use]
    pub fn service_name_for(&self, type_name: &str) -> String {
        let stem = self
            .suffixes
            .iter()
            .find_map(|suffix| {
                type_name
                    .strip_suffix(suffix.as_str())
                    .filter(|stem| !stem.is_empty())
            })
            .unwrap_or(type_name);

        stem.chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

fn check_label(field: &'static str, label: &str, value: &str) -> Result<(), RegistryError> {
    let reason = if label.is_empty() {
        Some("empty DNS label")
    } else if label.len() > 63 {
        Some("DNS label longer than 63 characters")
    } else if !label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        Some("only lowercase letters, digits and '-' are allowed")
    } else if label.starts_with('-') || label.ends_with('-') {
        Some("DNS label must not start or end with '-'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidClusterAddress {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

impl ServiceRegistry for ClusterDnsRegistry {
    fn lookup(&self, request_type: RequestType) -> Option<ServiceEntry> {
        let service_name = self.service_name_for(request_type.name());
        let address = format!(
            "{}://{}.{}.{}:{}",
            self.scheme, service_name, self.namespace, self.cluster_domain, self.port
        );
        // Every part is validated or derived from [a-z0-9-], so this only
        // fails if the URI parser itself changes.
        match address.parse::<Uri>() {
            Ok(uri) => Some(ServiceEntry::remote(service_name, uri)),
            Err(err) => {
                tracing::error!(
                    request_type = request_type.name(),
                    address = address.as_str(),
                    error = %err,
                    "derived cluster address is not a valid URI"
                );
                None
            }
        }
    }
}
