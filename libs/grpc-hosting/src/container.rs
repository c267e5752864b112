//! Service collection: the registration half of the dependency container.
//!
//! Registrations are keyed by *interface type* (`T` may be a trait object like
//! `dyn my_crate::Api`) and carry a lifetime plus a factory. Building the collection
//! produces a [`ServiceProvider`], the resolution half.
//!
//! Implementation details:
//! - Key = `type_name::<T>()`, which works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Arc<dyn Any + Send + Sync>` (downcast on read).
//! - Several registrations under one key are kept in order; the last one wins for
//!   single resolution, all of them are returned by `get_all`.

use std::{any::Any, fmt, sync::Arc};

use crate::hosting::BackgroundService;
use crate::provider::ServiceProvider;

/// Registration key: the fully-qualified `type_name::<T>()`.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ServiceLifetime {
    /// One instance per container, created on first resolution.
    Singleton,
    /// One instance per scope; cannot be resolved from the root provider.
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

/// Type-erased resolved value. The payload is always exactly `Arc<T>`.
pub(crate) type BoxedService = Arc<dyn Any + Send + Sync>;

pub(crate) type ErasedFactory =
    Arc<dyn Fn(&ServiceProvider) -> anyhow::Result<BoxedService> + Send + Sync>;

/// A single registration.
pub(crate) struct ServiceDescriptor {
    pub(crate) key: TypeKey,
    pub(crate) lifetime: ServiceLifetime,
    pub(crate) factory: ErasedFactory,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("key", &self.key)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Mutable list of registrations. Consumed by [`ServiceCollection::build`].
#[derive(Default)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already constructed singleton under the interface type `T`.
    pub fn add_singleton<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.add_singleton_factory::<T, _>(move |_| Ok(Arc::clone(&instance)))
    }

    /// Register a singleton built lazily from the root provider on first resolution.
    pub fn add_singleton_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push::<T, F>(ServiceLifetime::Singleton, factory)
    }

    /// Register a service built once per scope.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push::<T, F>(ServiceLifetime::Scoped, factory)
    }

    /// Register a service built anew on every resolution.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push::<T, F>(ServiceLifetime::Transient, factory)
    }

    /// Register a background service the host starts and stops with itself.
    ///
    /// Background services are singletons keyed by `dyn BackgroundService`; any number
    /// of them may be registered.
    pub fn add_hosted_service<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<dyn BackgroundService>>
            + Send
            + Sync
            + 'static,
    {
        self.add_singleton_factory::<dyn BackgroundService, F>(factory)
    }

    /// Whether anything is registered under the interface type `T`.
    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let key = TypeKey::of::<T>();
        self.descriptors.iter().any(|d| d.key == key)
    }

    /// Number of registrations under the interface type `T`.
    #[must_use]
    pub fn count<T: ?Sized + 'static>(&self) -> usize {
        let key = TypeKey::of::<T>();
        self.descriptors.iter().filter(|d| d.key == key).count()
    }

    /// Total registrations, across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freeze the registrations into a root provider.
    #[must_use]
    pub fn build(self) -> ServiceProvider {
        tracing::debug!(
            registrations = self.descriptors.len(),
            "Building service provider"
        );
        ServiceProvider::from_descriptors(self.descriptors)
    }

    fn push<T, F>(&mut self, lifetime: ServiceLifetime, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let erased: ErasedFactory = Arc::new(move |services: &ServiceProvider| {
            let instance = factory(services)?;
            Ok(Arc::new(instance) as BoxedService)
        });
        self.descriptors.push(ServiceDescriptor {
            key: TypeKey::of::<T>(),
            lifetime,
            factory: erased,
        });
        self
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("descriptors", &self.descriptors)
            .finish()
    }
}
