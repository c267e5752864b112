//! Service binders: how a service implementation becomes a [`ServiceDefinition`].
//!
//! Binders are looked up by implementation type at registration time, never written at
//! the registration site. They come from two places:
//! - link-time registrations submitted with [`register_service_binder!`], collected by
//!   `inventory` into [`BinderCatalog::discovered`];
//! - explicit registrations on a [`BinderCatalog`].
//!
//! The conventional binder is [`BindService::bind_service`]. Resolution for a type
//! requires exactly one candidate: none or several is an error.

use std::{any::Any, fmt, sync::Arc};

use crate::container::TypeKey;
use crate::server::ServiceDefinition;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinderError {
    #[error("could not find service binder for provided service {service}")]
    NotFound { service: TypeKey },

    #[error("ambiguous service binder for {service}: {count} candidates registered")]
    Ambiguous { service: TypeKey, count: usize },
}

/// Convention for service implementations: turn a shared instance into a definition.
///
/// With `tonic-build` output this is typically
/// `ServiceDefinition::new(GreeterServer::from_arc(self))`.
pub trait BindService: Send + Sync + Sized + 'static {
    fn bind_service(self: Arc<Self>) -> ServiceDefinition;
}

type BindFn<S> = dyn Fn(Arc<S>) -> ServiceDefinition + Send + Sync;

/// A resolved binder for the implementation type `S`.
pub struct ServiceBinder<S> {
    bind: Arc<BindFn<S>>,
}

impl<S> Clone for ServiceBinder<S> {
    fn clone(&self) -> Self {
        Self {
            bind: Arc::clone(&self.bind),
        }
    }
}

impl<S: Send + Sync + 'static> ServiceBinder<S> {
    #[must_use]
    pub fn new<F>(bind: F) -> Self
    where
        F: Fn(Arc<S>) -> ServiceDefinition + Send + Sync + 'static,
    {
        Self {
            bind: Arc::new(bind),
        }
    }

    /// Binder delegating to [`BindService::bind_service`].
    #[must_use]
    pub fn conventional() -> Self
    where
        S: BindService,
    {
        Self::new(S::bind_service)
    }

    #[must_use]
    pub fn bind(&self, service: Arc<S>) -> ServiceDefinition {
        (self.bind)(service)
    }
}

impl<S: 'static> fmt::Debug for ServiceBinder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinder")
            .field("service", &TypeKey::of::<S>())
            .finish_non_exhaustive()
    }
}

/// Link-time binder registration. Submit through [`register_service_binder!`].
pub struct BinderRegistration {
    /// Builds a boxed `ServiceBinder<S>` for the registered type.
    pub make: fn() -> Box<dyn Any + Send + Sync>,
}

inventory::collect!(BinderRegistration);

/// Register a binder for a service implementation type at link time.
///
/// ```ignore
/// // Uses `BindService::bind_service`.
/// register_service_binder!(GreeterImpl);
/// // Explicit binder.
/// register_service_binder!(GreeterImpl, |svc| ServiceDefinition::new(GreeterServer::from_arc(svc)));
/// ```
#[macro_export]
macro_rules! register_service_binder {
    ($service:ty) => {
        $crate::inventory::submit! {
            $crate::binder::BinderRegistration {
                make: || ::std::boxed::Box::new(
                    $crate::binder::ServiceBinder::<$service>::conventional()
                ),
            }
        }
    };
    ($service:ty, $bind:expr) => {
        $crate::inventory::submit! {
            $crate::binder::BinderRegistration {
                make: || ::std::boxed::Box::new(
                    $crate::binder::ServiceBinder::<$service>::new($bind)
                ),
            }
        }
    };
}

/// A set of candidate binders, searched by implementation type.
#[derive(Default)]
pub struct BinderCatalog {
    entries: Vec<Box<dyn Any + Send + Sync>>,
}

impl BinderCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog seeded with every binder submitted via [`register_service_binder!`].
    #[must_use]
    pub fn discovered() -> Self {
        let entries: Vec<_> = inventory::iter::<BinderRegistration>
            .into_iter()
            .map(|reg| (reg.make)())
            .collect();
        tracing::debug!(binders = entries.len(), "Discovered service binders");
        Self { entries }
    }

    /// Add an explicit binder for `S`.
    pub fn register<S, F>(&mut self, bind: F) -> &mut Self
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>) -> ServiceDefinition + Send + Sync + 'static,
    {
        self.entries.push(Box::new(ServiceBinder::<S>::new(bind)));
        self
    }

    /// Add the conventional [`BindService`] binder for `S`.
    pub fn register_conventional<S: BindService>(&mut self) -> &mut Self {
        self.entries.push(Box::new(ServiceBinder::<S>::conventional()));
        self
    }

    /// Total number of candidates, across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the single binder registered for `S`.
    ///
    /// # Errors
    /// `NotFound` when no candidate exists, `Ambiguous` when more than one does.
    pub fn resolve<S: Send + Sync + 'static>(&self) -> Result<ServiceBinder<S>, BinderError> {
        let service = TypeKey::of::<S>();
        let mut candidates = self
            .entries
            .iter()
            .filter_map(|e| e.downcast_ref::<ServiceBinder<S>>());

        match (candidates.next(), candidates.count()) {
            (Some(binder), 0) => Ok(binder.clone()),
            (None, _) => Err(BinderError::NotFound { service }),
            (Some(_), rest) => Err(BinderError::Ambiguous {
                service,
                count: rest + 1,
            }),
        }
    }
}

impl fmt::Debug for BinderCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderCatalog")
            .field("entries", &self.entries.len())
            .finish()
    }
}
