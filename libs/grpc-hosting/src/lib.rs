#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
//! gRPC hosting
//!
//! Registers tonic servers with a dependency container so a [`Host`] starts them on
//! startup and stops them on shutdown, and runs units of work in short-lived
//! dependency scopes with [`ScopedExecutor`].
//!
//! ```ignore
//! register_service_binder!(GreeterImpl);
//!
//! let mut services = ServiceCollection::new();
//! services.add_grpc_service::<GreeterImpl, _>(["0.0.0.0:50051".parse()?], None)?;
//! Host::new(services).run(ShutdownOptions::Signals).await?;
//! ```

// === CONTAINER ===
pub mod container;
pub mod provider;
pub mod scoped_executor;

// === GRPC HOSTING ===
pub mod binder;
pub mod config;
pub mod hosting;
pub mod registration;
pub mod server;

pub use binder::{BindService, BinderCatalog, BinderError, ServiceBinder};
pub use config::{ConfigError, GrpcServerConfig};
pub use container::{ServiceCollection, ServiceLifetime, TypeKey};
pub use hosting::{
    BackgroundService, GrpcBackgroundService, Host, HostError, HostOptions, ShutdownOptions,
    TypedGrpcBackgroundService, TypedServerContainer,
};
pub use provider::{ResolveError, Scope, ServiceProvider};
pub use registration::{FromServices, GrpcServerCollectionExt, HostingError};
pub use scoped_executor::ScopedExecutor;
pub use server::{GrpcServer, ServerError, ServerOptions, ServerPort, ServerStatus, ServiceDefinition};

#[doc(hidden)]
pub use inventory;
