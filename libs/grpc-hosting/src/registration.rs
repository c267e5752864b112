//! Registration of gRPC servers as host-managed background services.
//!
//! Three entry points on [`ServiceCollection`]:
//! - [`add_grpc_server`](GrpcServerCollectionExt::add_grpc_server) takes a ready server;
//! - [`add_grpc_server_factory`](GrpcServerCollectionExt::add_grpc_server_factory) builds one
//!   lazily from the built container;
//! - [`add_grpc_service`](GrpcServerCollectionExt::add_grpc_service) assembles a dedicated
//!   server for one service implementation type, bound through its discovered binder.
//!
//! Registration only mutates the collection. Nothing listens until the host starts.

use std::sync::Arc;

use crate::binder::{BinderCatalog, BinderError};
use crate::config::GrpcServerConfig;
use crate::container::{ServiceCollection, TypeKey};
use crate::hosting::{
    BackgroundService, GrpcBackgroundService, TypedGrpcBackgroundService, TypedServerContainer,
};
use crate::provider::ServiceProvider;
use crate::server::{GrpcServer, ServerOptions, ServerPort};

/// Construction of a service implementation from the container.
pub trait FromServices: Sized {
    /// # Errors
    /// Returns an error if a dependency cannot be resolved or construction fails.
    fn from_services(services: &ServiceProvider) -> anyhow::Result<Self>;
}

#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("gRPC server for service type {service_type} is already registered")]
    DuplicateRegistration { service_type: TypeKey },

    #[error(transparent)]
    Binder(#[from] BinderError),
}

/// gRPC hosting registrations on a [`ServiceCollection`].
pub trait GrpcServerCollectionExt {
    /// Register a caller-constructed server and the background service driving it.
    fn add_grpc_server(&mut self, server: GrpcServer) -> &mut Self;

    /// Register a server built on first resolution, at most once, and the background
    /// service driving it.
    fn add_grpc_server_factory<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&ServiceProvider) -> anyhow::Result<GrpcServer> + Send + Sync + 'static;

    /// Register a dedicated server for the service implementation `S`, bound with the
    /// binder discovered through [`register_service_binder!`](crate::register_service_binder).
    ///
    /// # Errors
    /// See [`add_grpc_service_with`](Self::add_grpc_service_with).
    fn add_grpc_service<S, I>(
        &mut self,
        ports: I,
        options: Option<ServerOptions>,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static,
        I: IntoIterator<Item = ServerPort>;

    /// Like [`add_grpc_service`](Self::add_grpc_service), resolving the binder from `catalog`.
    ///
    /// # Errors
    /// `DuplicateRegistration` if `S` is already registered; `Binder` if `catalog` does not
    /// hold exactly one binder for `S`. The collection is left unchanged on error.
    fn add_grpc_service_with<S, I>(
        &mut self,
        catalog: &BinderCatalog,
        ports: I,
        options: Option<ServerOptions>,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static,
        I: IntoIterator<Item = ServerPort>;

    /// Like [`add_grpc_service`](Self::add_grpc_service), with ports and options from config.
    ///
    /// # Errors
    /// See [`add_grpc_service_with`](Self::add_grpc_service_with).
    fn add_grpc_service_from_config<S>(
        &mut self,
        config: &GrpcServerConfig,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static;
}

impl GrpcServerCollectionExt for ServiceCollection {
    fn add_grpc_server(&mut self, server: GrpcServer) -> &mut Self {
        self.add_singleton(Arc::new(server));
        register_background_service(self)
    }

    fn add_grpc_server_factory<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&ServiceProvider) -> anyhow::Result<GrpcServer> + Send + Sync + 'static,
    {
        self.add_singleton_factory::<GrpcServer, _>(move |services| {
            Ok(Arc::new(factory(services)?))
        });
        register_background_service(self)
    }

    fn add_grpc_service<S, I>(
        &mut self,
        ports: I,
        options: Option<ServerOptions>,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static,
        I: IntoIterator<Item = ServerPort>,
    {
        self.add_grpc_service_with::<S, I>(&BinderCatalog::discovered(), ports, options)
    }

    fn add_grpc_service_with<S, I>(
        &mut self,
        catalog: &BinderCatalog,
        ports: I,
        options: Option<ServerOptions>,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static,
        I: IntoIterator<Item = ServerPort>,
    {
        if self.contains::<S>() {
            return Err(HostingError::DuplicateRegistration {
                service_type: TypeKey::of::<S>(),
            });
        }
        let binder = catalog.resolve::<S>()?;
        let ports: Vec<ServerPort> = ports.into_iter().collect();
        let options = options.unwrap_or_default();

        tracing::debug!(
            service = %TypeKey::of::<S>(),
            ports = ports.len(),
            "Registering gRPC service"
        );

        self.add_singleton_factory::<S, _>(|services| Ok(Arc::new(S::from_services(services)?)));
        self.add_singleton_factory::<TypedServerContainer<S>, _>(move |services| {
            let service = services.get::<S>()?;
            let mut server = GrpcServer::new(options.clone());
            server
                .add_ports(ports.iter().cloned())
                .add_service(binder.bind(service));
            Ok(Arc::new(TypedServerContainer::new(server)))
        });
        self.add_hosted_service(|services| {
            let container = services.get::<TypedServerContainer<S>>()?;
            Ok(Arc::new(TypedGrpcBackgroundService::new(&container)) as Arc<dyn BackgroundService>)
        });
        Ok(self)
    }

    fn add_grpc_service_from_config<S>(
        &mut self,
        config: &GrpcServerConfig,
    ) -> Result<&mut Self, HostingError>
    where
        S: FromServices + Send + Sync + 'static,
    {
        self.add_grpc_service::<S, _>(config.ports.iter().cloned(), Some(config.options.clone()))
    }
}

fn register_background_service(services: &mut ServiceCollection) -> &mut ServiceCollection {
    services.add_hosted_service(|services| {
        let server = services.get::<GrpcServer>()?;
        Ok(Arc::new(GrpcBackgroundService::new(server)) as Arc<dyn BackgroundService>)
    })
}
