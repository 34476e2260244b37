//! `Conduit` Pipeline: ordered interceptor chain, endpoint resolution, and
//! local/remote dispatch.
//!
//! A call flows through:
//!
//! 1. **Resolution** (`resolver`): request type -> local or remote, memoized
//! 2. **Chain** (`chain`): interceptors sorted by order, outermost first
//! 3. **Dispatch** (`dispatch`): in-process handler or transport round trip
//! 4. **Invoker** (`invoker`): typed encode on entry, typed decode on exit

pub mod builder;
pub mod cache;
pub mod chain;
pub mod config;
pub mod dispatch;
pub mod interceptors;
pub mod invoker;
pub mod observability;
pub mod registry;
pub mod resolver;

// Re-export key types for convenient access.
pub use builder::PipelineBuilder;
pub use cache::{CacheError, CacheKeyStrategy, CacheStore, InMemoryCacheStore, OperationKeyStrategy};
pub use chain::{order, Call, Interceptor, InterceptorChain, Next};
pub use config::{ConfigError, PipelineConfig};
pub use dispatch::{
    Dispatch, DispatchRouter, Handler, HandlerRegistry, HttpTransport, LocalDispatcher,
    RemoteDispatcher, Terminal, Transport, TransportError, TransportRequest, TransportResponse,
    WireFormat,
};
pub use invoker::{CallOptions, Pipeline};
pub use observability::init_tracing;
pub use registry::{ClusterDnsRegistry, RegistryError, ServiceRegistry, StaticServiceRegistry};
pub use resolver::EndpointResolver;
