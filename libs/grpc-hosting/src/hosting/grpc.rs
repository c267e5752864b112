use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::BackgroundService;
use crate::server::GrpcServer;

/// A server tagged with the service type it was assembled for, so one container can
/// hold an independent server per service type.
pub struct TypedServerContainer<S> {
    server: Arc<GrpcServer>,
    _service: PhantomData<fn() -> S>,
}

impl<S> TypedServerContainer<S> {
    #[must_use]
    pub fn new(server: GrpcServer) -> Self {
        Self {
            server: Arc::new(server),
            _service: PhantomData,
        }
    }

    #[must_use]
    pub fn server(&self) -> &Arc<GrpcServer> {
        &self.server
    }
}

impl<S> fmt::Debug for TypedServerContainer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedServerContainer")
            .field("service", &std::any::type_name::<S>())
            .field("server", &self.server)
            .finish()
    }
}

/// Starts and stops a registered [`GrpcServer`] with the host.
pub struct GrpcBackgroundService {
    server: Arc<GrpcServer>,
}

impl GrpcBackgroundService {
    #[must_use]
    pub fn new(server: Arc<GrpcServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl BackgroundService for GrpcBackgroundService {
    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        self.server.start().await?;
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.server.shutdown(cancel).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "grpc_server"
    }
}

/// Starts and stops the server of the [`TypedServerContainer<S>`] registered for `S`.
pub struct TypedGrpcBackgroundService<S> {
    inner: GrpcBackgroundService,
    _service: PhantomData<fn() -> S>,
}

impl<S> TypedGrpcBackgroundService<S> {
    #[must_use]
    pub fn new(container: &TypedServerContainer<S>) -> Self {
        Self {
            inner: GrpcBackgroundService::new(Arc::clone(container.server())),
            _service: PhantomData,
        }
    }
}

#[async_trait]
impl<S: 'static> BackgroundService for TypedGrpcBackgroundService<S> {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::debug!(service = std::any::type_name::<S>(), "Starting typed gRPC server");
        self.inner.start(cancel).await
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.inner.stop(cancel).await
    }

    fn name(&self) -> &str {
        std::any::type_name::<S>()
    }
}
