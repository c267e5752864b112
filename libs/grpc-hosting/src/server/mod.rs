//! The managed gRPC server.
//!
//! A [`GrpcServer`] is assembled while owned (ports, service definitions, options) and
//! then shared. Its lifecycle is start-once / stop-once:
//! `Created → Starting → Running → Stopped`. A failed start ends in `Stopped`.
//!
//! Starting binds one TCP listener per port and serves the full route table on each of
//! them; stopping drains in-flight calls until a deadline token fires, after which the
//! serving tasks are aborted.

mod definition;
mod options;
mod port;

pub use definition::ServiceDefinition;
pub use options::ServerOptions;
pub use port::{InvalidServerPort, ServerPort};

use std::{collections::HashSet, fmt, net::SocketAddr};

use parking_lot::{Mutex, RwLock};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::{Routes, RoutesBuilder};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("gRPC server already started")]
    AlreadyStarted,

    #[error("gRPC server was never started")]
    NotStarted,

    #[error("duplicate gRPC service detected: {0}")]
    DuplicateService(&'static str),

    #[error("failed to bind gRPC listener on {port}: {source}")]
    Bind {
        port: ServerPort,
        #[source]
        source: std::io::Error,
    },

    #[error("gRPC server on {addr} failed: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("gRPC serving task on {addr} panicked")]
    TaskPanicked { addr: SocketAddr },
}

/// Observable lifecycle phase of a [`GrpcServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Created,
    Starting,
    Running,
    Stopped,
}

struct ServeTask {
    addr: SocketAddr,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

struct Running {
    graceful: CancellationToken,
    tasks: Vec<ServeTask>,
}

enum State {
    Created,
    Starting,
    Running(Running),
    Stopped,
}

impl State {
    fn status(&self) -> ServerStatus {
        match self {
            State::Created => ServerStatus::Created,
            State::Starting => ServerStatus::Starting,
            State::Running(_) => ServerStatus::Running,
            State::Stopped => ServerStatus::Stopped,
        }
    }
}

/// A start in progress. Dropped without [`commit`](Self::commit), on error or when the
/// start future is dropped, it aborts the serving tasks spawned so far and leaves the
/// server `Stopped`.
struct PendingStart<'a> {
    server: &'a GrpcServer,
    graceful: CancellationToken,
    tasks: Vec<ServeTask>,
    committed: bool,
}

impl<'a> PendingStart<'a> {
    fn new(server: &'a GrpcServer) -> Self {
        Self {
            server,
            graceful: CancellationToken::new(),
            tasks: Vec::with_capacity(server.ports.len()),
            committed: false,
        }
    }

    fn commit(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        *self.server.bound.write() = tasks.iter().map(|t| t.addr).collect();
        *self.server.state.lock() = State::Running(Running {
            graceful: self.graceful.clone(),
            tasks,
        });
        self.committed = true;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.graceful.cancel();
        for task in &self.tasks {
            task.handle.abort();
        }
        self.server.bound.write().clear();
        *self.server.state.lock() = State::Stopped;
        tracing::warn!(
            aborted = self.tasks.len(),
            "gRPC server start did not complete; listeners released"
        );
    }
}

/// A tonic-backed gRPC server with an explicit start/stop lifecycle.
pub struct GrpcServer {
    options: ServerOptions,
    ports: Vec<ServerPort>,
    services: Vec<ServiceDefinition>,
    state: Mutex<State>,
    bound: RwLock<Vec<SocketAddr>>,
}

impl Default for GrpcServer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

impl GrpcServer {
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            ports: Vec::new(),
            services: Vec::new(),
            state: Mutex::new(State::Created),
            bound: RwLock::new(Vec::new()),
        }
    }

    pub fn add_port(&mut self, port: ServerPort) -> &mut Self {
        self.ports.push(port);
        self
    }

    pub fn add_ports(&mut self, ports: impl IntoIterator<Item = ServerPort>) -> &mut Self {
        self.ports.extend(ports);
        self
    }

    pub fn add_service(&mut self, service: ServiceDefinition) -> &mut Self {
        self.services.push(service);
        self
    }

    pub fn add_services(
        &mut self,
        services: impl IntoIterator<Item = ServiceDefinition>,
    ) -> &mut Self {
        self.services.extend(services);
        self
    }

    #[must_use]
    pub fn ports(&self) -> &[ServerPort] {
        &self.ports
    }

    #[must_use]
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    #[must_use]
    pub fn status(&self) -> ServerStatus {
        self.state.lock().status()
    }

    /// Addresses actually bound, one per port, in port order. Empty until started.
    #[must_use]
    pub fn bound_addrs(&self) -> Vec<SocketAddr> {
        self.bound.read().clone()
    }

    /// Bind every port and start serving in background tasks.
    ///
    /// Returns once all listeners are bound.
    ///
    /// # Errors
    /// `AlreadyStarted` on any call after the first; `DuplicateService` or `Bind` if the
    /// server cannot be brought up, in which case it ends in `Stopped`. Dropping the
    /// returned future before it completes also ends in `Stopped`.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Created) {
                return Err(ServerError::AlreadyStarted);
            }
            *state = State::Starting;
        }

        let mut pending = PendingStart::new(self);
        self.bind_and_serve(&mut pending).await?;
        pending.commit();
        Ok(())
    }

    /// Stop serving. In-flight calls drain until `deadline` is cancelled; any task still
    /// running then is aborted. Stopping an already stopped server is a no-op.
    ///
    /// # Errors
    /// `NotStarted` if the server never started; otherwise the first serving failure.
    pub async fn shutdown(&self, deadline: CancellationToken) -> Result<(), ServerError> {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => running,
                State::Stopped => return Ok(()),
                previous @ (State::Created | State::Starting) => {
                    *state = previous;
                    return Err(ServerError::NotStarted);
                }
            }
        };

        running.graceful.cancel();

        let mut first_err = None;
        for mut task in running.tasks {
            let joined = tokio::select! {
                joined = &mut task.handle => joined,
                () = deadline.cancelled() => {
                    tracing::warn!(addr = %task.addr, "gRPC shutdown deadline reached; aborting listener");
                    task.handle.abort();
                    (&mut task.handle).await
                }
            };

            let err = match joined {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(ServerError::Serve {
                    addr: task.addr,
                    source,
                }),
                Err(join) if join.is_cancelled() => None,
                Err(_) => Some(ServerError::TaskPanicked { addr: task.addr }),
            };
            if first_err.is_none() {
                first_err = err;
            }
        }

        self.bound.write().clear();
        tracing::info!("gRPC server stopped");
        first_err.map_or(Ok(()), Err)
    }

    /// Stop immediately, aborting in-flight calls.
    ///
    /// # Errors
    /// See [`shutdown`](Self::shutdown).
    pub async fn kill(&self) -> Result<(), ServerError> {
        let deadline = CancellationToken::new();
        deadline.cancel();
        self.shutdown(deadline).await
    }

    fn build_routes(&self) -> Result<Routes, ServerError> {
        let mut seen = HashSet::new();
        let mut routes_builder = RoutesBuilder::default();
        for service in &self.services {
            if !seen.insert(service.service_name()) {
                return Err(ServerError::DuplicateService(service.service_name()));
            }
            service.install(&mut routes_builder);
        }
        Ok(routes_builder.routes())
    }

    async fn bind_and_serve(&self, pending: &mut PendingStart<'_>) -> Result<(), ServerError> {
        let routes = self.build_routes()?;

        for port in &self.ports {
            let (listener, addr) = Self::bind(port).await?;

            let router = self.options.builder().add_routes(routes.clone());
            let token = pending.graceful.clone();
            let handle = tokio::spawn(async move {
                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                        token.cancelled().await;
                    })
                    .await
            });

            tracing::info!(
                %addr,
                services = self.services.len(),
                transport = "tcp",
                "gRPC server listening"
            );
            pending.tasks.push(ServeTask { addr, handle });
        }

        if pending.tasks.is_empty() {
            tracing::info!("gRPC server started without ports");
        }
        Ok(())
    }

    async fn bind(port: &ServerPort) -> Result<(TcpListener, SocketAddr), ServerError> {
        let to_err = |source| ServerError::Bind {
            port: port.clone(),
            source,
        };
        let listener = TcpListener::bind((port.host(), port.port()))
            .await
            .map_err(to_err)?;
        let addr = listener.local_addr().map_err(to_err)?;
        Ok((listener, addr))
    }
}

impl fmt::Debug for GrpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcServer")
            .field("options", &self.options)
            .field("ports", &self.ports)
            .field("services", &self.services)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
