//! Routing facts: registry entries and resolver decisions.

use http::Uri;

/// The registry's routing fact for one request type. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    service_name: String,
    endpoint: Uri,
    is_local: bool,
}

impl ServiceEntry {
    /// Entry routing to a remote service at `endpoint`.
    #[must_use]
    pub fn remote(service_name: impl Into<String>, endpoint: Uri) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint,
            is_local: false,
        }
    }

    /// Entry pinning a request type to in-process execution.
    #[must_use]
    pub fn local(service_name: impl Into<String>, endpoint: Uri) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint,
            is_local: true,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// The resolution this entry implies. Service name and URI are only
    /// carried for remote entries.
    #[must_use]
    pub fn to_resolution(&self) -> EndpointResolution {
        if self.is_local {
            EndpointResolution::Local
        } else {
            EndpointResolution::Remote {
                service_name: self.service_name.clone(),
                uri: self.endpoint.clone(),
            }
        }
    }
}

/// Whether a request type is served in-process or forwarded, plus the routing
/// data for the forwarded case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointResolution {
    Local,
    Remote { service_name: String, uri: Uri },
}

impl EndpointResolution {
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Remote { service_name, .. } => Some(service_name),
        }
    }

    #[must_use]
    pub fn uri(&self) -> Option<&Uri> {
        match self {
            Self::Local => None,
            Self::Remote { uri, .. } => Some(uri),
        }
    }
}
