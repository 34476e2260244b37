//! Static route table: explicit `{request type -> entry}` registration.

use conduit_core::{RequestType, ServiceEntry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{RegistryError, ServiceRegistry};

/// Explicit `{request type -> entry}` table.
///
/// Routes registered from code (`RequestType::of::<R>()`) are keyed by the
/// full type path. Routes loaded from configuration only know a short name
/// and are keyed by it; lookup tries the path first and falls back to the
/// short name. Two code-registered types sharing a short name are rejected,
/// as is a second route for the same key. Entries are write-once.
#[derive(Debug, Default)]
pub struct StaticServiceRegistry {
    entries: DashMap<String, ServiceEntry>,
    typed_names: DashMap<&'static str, &'static str>,
}

impl StaticServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the route for `request_type`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyRegistered` if the type already has an
    /// entry, or `RegistryError::AmbiguousName` if a different type with the
    /// same short name was registered before.
    pub fn register(
        &self,
        request_type: RequestType,
        entry: ServiceEntry,
    ) -> Result<(), RegistryError> {
        match self.typed_names.entry(request_type.name()) {
            Entry::Occupied(occupied) if *occupied.get() != request_type.path() => {
                return Err(RegistryError::AmbiguousName {
                    name: request_type.name().to_string(),
                    existing: (*occupied.get()).to_string(),
                    conflicting: request_type.path().to_string(),
                });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(request_type.path());
            }
        }
        self.register_name(request_type.path(), entry)
    }

    /// Registers a route by request type name.
    ///
    /// A name route matches every type whose short name equals `name` and
    /// that has no route of its own.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyRegistered` if the name already has an entry.
    pub fn register_name(
        &self,
        name: impl Into<String>,
        entry: ServiceEntry,
    ) -> Result<(), RegistryError> {
        match self.entries.entry(name.into()) {
            Entry::Occupied(occupied) => Err(RegistryError::AlreadyRegistered {
                request_type: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                tracing::debug!(
                    request_type = vacant.key().as_str(),
                    service = entry.service_name(),
                    local = entry.is_local(),
                    "route registered"
                );
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServiceRegistry for StaticServiceRegistry {
    fn lookup(&self, request_type: RequestType) -> Option<ServiceEntry> {
        self.entries
            .get(request_type.path())
            .or_else(|| self.entries.get(request_type.name()))
            .map(|entry| entry.value().clone())
    }
}
