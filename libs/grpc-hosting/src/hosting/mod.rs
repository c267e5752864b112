//! Host lifecycle: owns the service provider and drives background services.
//!
//! Phase order: build container → start (registration order) → wait → stop (reverse order).
//! Stop failures are logged and do not interrupt the stop phase.

mod grpc;
mod shutdown;

pub use grpc::{GrpcBackgroundService, TypedGrpcBackgroundService, TypedServerContainer};
pub use shutdown::{wait_for_shutdown, ShutdownOptions};

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::container::ServiceCollection;
use crate::provider::{ResolveError, ServiceProvider};

/// A unit of work the host starts on startup and stops on shutdown.
#[async_trait]
pub trait BackgroundService: Send + Sync {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// `cancel` fires when the host's shutdown timeout elapses.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Name used in lifecycle logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host already started")]
    AlreadyStarted,

    #[error("host was never started")]
    NotStarted,

    #[error("failed to resolve background services: {0}")]
    Resolve(#[from] ResolveError),

    #[error("background service '{service}' failed to start: {source}")]
    Start {
        service: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// How long stopping may drain before background services are told to abort.
    pub shutdown_timeout: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

enum Phase {
    Created,
    Started(Vec<Arc<dyn BackgroundService>>),
    Stopped,
}

/// Owns the built service provider and the lifecycle of every registered
/// [`BackgroundService`].
pub struct Host {
    services: ServiceProvider,
    options: HostOptions,
    phase: Phase,
}

impl Host {
    #[must_use]
    pub fn new(collection: ServiceCollection) -> Self {
        Self::with_options(collection, HostOptions::default())
    }

    #[must_use]
    pub fn with_options(collection: ServiceCollection, options: HostOptions) -> Self {
        Self {
            services: collection.build(),
            options,
            phase: Phase::Created,
        }
    }

    /// The root service provider.
    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    /// START phase: resolve every background service and start them in registration order.
    ///
    /// Services started before a failure stay tracked, so a later [`stop`](Self::stop)
    /// still stops them.
    ///
    /// # Errors
    /// `AlreadyStarted` on a second call; `Resolve` if a background service cannot be
    /// constructed; `Start` for the first service whose start fails.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), HostError> {
        if !matches!(self.phase, Phase::Created) {
            return Err(HostError::AlreadyStarted);
        }
        tracing::info!("Phase: start");

        let background = self.services.get_all::<dyn BackgroundService>()?;
        let mut started = Vec::with_capacity(background.len());

        for service in background {
            tracing::debug!(service = service.name(), "Starting background service");
            if let Err(source) = service.start(cancel.clone()).await {
                let name = service.name().to_owned();
                self.phase = Phase::Started(started);
                return Err(HostError::Start {
                    service: name,
                    source,
                });
            }
            tracing::info!(service = service.name(), "Started background service");
            started.push(service);
        }

        self.phase = Phase::Started(started);
        Ok(())
    }

    /// STOP phase: stop started services in reverse order.
    ///
    /// Errors are logged but do not fail the stop phase. Calling `stop` again is a no-op.
    ///
    /// # Errors
    /// `NotStarted` if [`start`](Self::start) was never called.
    pub async fn stop(&mut self) -> Result<(), HostError> {
        let started = match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Started(started) => started,
            Phase::Stopped => return Ok(()),
            Phase::Created => {
                self.phase = Phase::Created;
                return Err(HostError::NotStarted);
            }
        };
        tracing::info!("Phase: stop");

        let deadline = CancellationToken::new();
        let timer = {
            let deadline = deadline.clone();
            let timeout = self.options.shutdown_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(?timeout, "Shutdown timeout elapsed");
                deadline.cancel();
            })
        };

        for service in started.iter().rev() {
            Self::stop_one(service.as_ref(), deadline.clone()).await;
        }

        timer.abort();
        Ok(())
    }

    /// Run the full lifecycle: start → wait for shutdown → stop.
    ///
    /// # Errors
    /// Returns an error if the start phase fails; services already started are stopped first.
    pub async fn run(mut self, shutdown: ShutdownOptions) -> anyhow::Result<()> {
        let cancel = match &shutdown {
            ShutdownOptions::Token(t) => t.clone(),
            _ => CancellationToken::new(),
        };
        let waiter = shutdown::spawn_waiter(shutdown, &cancel);

        if let Err(e) = self.start(cancel.clone()).await {
            if let Some(waiter) = waiter {
                waiter.abort();
            }
            self.stop().await?;
            return Err(e.into());
        }

        cancel.cancelled().await;

        self.stop().await?;
        Ok(())
    }

    /// Stop a single service, logging errors but continuing execution.
    async fn stop_one(service: &dyn BackgroundService, deadline: CancellationToken) {
        if let Err(err) = service.stop(deadline).await {
            tracing::warn!(service = service.name(), error = %err, "Failed to stop background service");
        } else {
            tracing::info!(service = service.name(), "Stopped background service");
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match &self.phase {
            Phase::Created => "created",
            Phase::Started(_) => "started",
            Phase::Stopped => "stopped",
        };
        f.debug_struct("Host")
            .field("services", &self.services)
            .field("options", &self.options)
            .field("phase", &phase)
            .finish()
    }
}
