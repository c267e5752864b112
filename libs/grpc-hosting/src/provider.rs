//! Service provider: the resolution half of the dependency container.
//!
//! A [`ServiceProvider`] is a cheap, cloneable handle. The root provider caches
//! singletons; a [`Scope`] is an owning guard around a child provider with its own
//! cache of scoped instances. Dropping the guard disposes the scope exactly once:
//! the cached instances are released and the scope's disposal token is cancelled.
//! Provider handles cloned out of a disposed scope refuse to resolve.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::container::{BoxedService, ServiceDescriptor, ServiceLifetime, TypeKey};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("service not registered: type={type_key}")]
    NotRegistered { type_key: TypeKey },

    #[error("type mismatch in container for type={type_key}")]
    TypeMismatch { type_key: TypeKey },

    #[error("scoped service type={type_key} cannot be resolved from the root provider")]
    ScopedFromRoot { type_key: TypeKey },

    #[error("scope {scope_id} is disposed; cannot resolve type={type_key}")]
    ScopeDisposed { scope_id: Uuid, type_key: TypeKey },

    #[error("factory for type={type_key} failed: {source}")]
    Factory {
        type_key: TypeKey,
        #[source]
        source: anyhow::Error,
    },
}

type Slot = Mutex<Option<BoxedService>>;

struct RootState {
    descriptors: Vec<ServiceDescriptor>,
    index: HashMap<TypeKey, Vec<usize>>,
    singletons: Vec<Slot>,
}

struct ScopeState {
    id: Uuid,
    instances: Vec<Slot>,
    disposed: CancellationToken,
}

impl ScopeState {
    fn dispose(&self) {
        if self.disposed.is_cancelled() {
            return;
        }
        self.disposed.cancel();
        let mut released = 0usize;
        for slot in &self.instances {
            if slot.lock().take().is_some() {
                released += 1;
            }
        }
        tracing::debug!(scope_id = %self.id, released, "Scope disposed");
    }
}

/// Resolves registered services. Clone freely; clones share the same caches.
#[derive(Clone)]
pub struct ServiceProvider {
    root: Arc<RootState>,
    scope: Option<Arc<ScopeState>>,
}

impl ServiceProvider {
    pub(crate) fn from_descriptors(descriptors: Vec<ServiceDescriptor>) -> Self {
        let mut index: HashMap<TypeKey, Vec<usize>> = HashMap::new();
        for (i, d) in descriptors.iter().enumerate() {
            index.entry(d.key).or_default().push(i);
        }
        let singletons = descriptors.iter().map(|_| Mutex::new(None)).collect();
        Self {
            root: Arc::new(RootState {
                descriptors,
                index,
                singletons,
            }),
            scope: None,
        }
    }

    /// Fetch the last registration for the interface type `T`.
    ///
    /// # Errors
    /// `NotRegistered` if nothing is registered under `T`; otherwise any lifetime or factory
    /// failure of the selected registration.
    pub fn get<T>(&self) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let idx = self
            .root
            .index
            .get(&type_key)
            .and_then(|all| all.last().copied())
            .ok_or(ResolveError::NotRegistered { type_key })?;
        self.resolve_as::<T>(idx)
    }

    /// Like [`get`](Self::get), but `None` when `T` is not registered.
    ///
    /// # Errors
    /// Any failure other than a missing registration.
    pub fn try_get<T>(&self) -> Result<Option<Arc<T>>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.get::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(ResolveError::NotRegistered { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch every registration for `T`, in registration order. Empty when none exist.
    ///
    /// # Errors
    /// The first lifetime or factory failure encountered.
    pub fn get_all<T>(&self) -> Result<Vec<Arc<T>>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let Some(all) = self.root.index.get(&TypeKey::of::<T>()) else {
            return Ok(Vec::new());
        };
        all.iter().map(|&idx| self.resolve_as::<T>(idx)).collect()
    }

    /// Whether anything is registered under `T`.
    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.root.index.contains_key(&TypeKey::of::<T>())
    }

    /// Create a fresh child scope. Scopes are always children of the root, even when
    /// created from a scoped provider.
    #[must_use]
    pub fn create_scope(&self) -> Scope {
        let state = ScopeState {
            id: Uuid::new_v4(),
            instances: self
                .root
                .descriptors
                .iter()
                .map(|_| Mutex::new(None))
                .collect(),
            disposed: CancellationToken::new(),
        };
        tracing::debug!(scope_id = %state.id, "Scope created");
        let state = Arc::new(state);
        Scope {
            provider: ServiceProvider {
                root: Arc::clone(&self.root),
                scope: Some(Arc::clone(&state)),
            },
            state,
        }
    }

    /// Whether this handle belongs to a scope (as opposed to the root).
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// Whether this handle belongs to a scope that has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.scope.as_ref().is_some_and(|s| s.disposed.is_cancelled())
    }

    fn root_handle(&self) -> ServiceProvider {
        ServiceProvider {
            root: Arc::clone(&self.root),
            scope: None,
        }
    }

    fn resolve_as<T>(&self, idx: usize) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let boxed = self.resolve_index(idx)?;
        // Stored value is exactly `Arc<T>`; downcast is safe and cheap.
        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(ResolveError::TypeMismatch {
                type_key: TypeKey::of::<T>(),
            })
    }

    fn resolve_index(&self, idx: usize) -> Result<BoxedService, ResolveError> {
        let descriptor = &self.root.descriptors[idx];
        let type_key = descriptor.key;

        if let Some(scope) = &self.scope {
            if scope.disposed.is_cancelled() {
                return Err(ResolveError::ScopeDisposed {
                    scope_id: scope.id,
                    type_key,
                });
            }
        }

        match descriptor.lifetime {
            ServiceLifetime::Singleton => {
                // Singletons only ever see the root, so they cannot capture scoped state.
                let root = self.root_handle();
                Self::get_or_create(&self.root.singletons[idx], descriptor, &root)
            }
            ServiceLifetime::Scoped => {
                let scope = self
                    .scope
                    .as_ref()
                    .ok_or(ResolveError::ScopedFromRoot { type_key })?;
                Self::get_or_create(&scope.instances[idx], descriptor, self)
            }
            ServiceLifetime::Transient => Self::create(descriptor, self),
        }
    }

    // The slot lock is held while the factory runs so a factory is invoked at most once
    // per slot. Cyclic registrations deadlock here.
    fn get_or_create(
        slot: &Slot,
        descriptor: &ServiceDescriptor,
        services: &ServiceProvider,
    ) -> Result<BoxedService, ResolveError> {
        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }
        // Disposal may have emptied this slot after the caller's check.
        if let Some(scope) = services.scope.as_ref().filter(|s| s.disposed.is_cancelled()) {
            return Err(ResolveError::ScopeDisposed {
                scope_id: scope.id,
                type_key: descriptor.key,
            });
        }
        let created = Self::create(descriptor, services)?;
        *guard = Some(Arc::clone(&created));
        Ok(created)
    }

    fn create(
        descriptor: &ServiceDescriptor,
        services: &ServiceProvider,
    ) -> Result<BoxedService, ResolveError> {
        tracing::debug!(
            type_key = %descriptor.key,
            lifetime = ?descriptor.lifetime,
            "Constructing service"
        );
        (descriptor.factory)(services).map_err(|source| ResolveError::Factory {
            type_key: descriptor.key,
            source,
        })
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("registrations", &self.root.descriptors.len())
            .field("scope", &self.scope.as_ref().map(|s| s.id))
            .finish()
    }
}

/// Owning guard of a child scope. Dropping it disposes the scope.
#[must_use = "dropping a Scope disposes it immediately"]
pub struct Scope {
    provider: ServiceProvider,
    state: Arc<ScopeState>,
}

impl Scope {
    /// The scoped provider. Clones of it stay valid only until the scope is disposed.
    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.provider
    }

    /// Shorthand for `self.services().get::<T>()`.
    ///
    /// # Errors
    /// See [`ServiceProvider::get`].
    pub fn get<T>(&self) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.provider.get::<T>()
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// A token cancelled when this scope is disposed.
    #[must_use]
    pub fn disposal_token(&self) -> CancellationToken {
        self.state.disposed.clone()
    }

    /// Dispose explicitly. Equivalent to dropping the guard.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.state.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::ServiceCollection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Counter(AtomicUsize);

    #[derive(Debug)]
    struct UnitOfWork {
        dropped: Arc<AtomicUsize>,
    }

    impl Drop for UnitOfWork {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collection_with_unit_of_work(dropped: &Arc<AtomicUsize>) -> ServiceCollection {
        let mut services = ServiceCollection::new();
        let dropped = Arc::clone(dropped);
        services.add_scoped::<UnitOfWork, _>(move |_| {
            Ok(Arc::new(UnitOfWork {
                dropped: Arc::clone(&dropped),
            }))
        });
        services
    }

    #[test]
    fn get_returns_not_found_for_unregistered_service() {
        let provider = ServiceCollection::new().build();

        match provider.get::<Counter>() {
            Err(ResolveError::NotRegistered { type_key }) => {
                assert!(
                    type_key.name().contains("Counter"),
                    "Error should reference the requested type"
                );
            }
            other => panic!("Expected NotRegistered, got {other:?}"),
        }
        assert!(provider.try_get::<Counter>().unwrap().is_none());
    }

    #[test]
    fn singleton_factory_runs_once_and_is_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut services = ServiceCollection::new();
        let calls_clone = Arc::clone(&calls);
        services.add_singleton_factory::<Counter, _>(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counter(AtomicUsize::new(0))))
        });

        let provider = services.build();
        assert_eq!(calls.load(Ordering::SeqCst), 0, "factory must be lazy");

        let a = provider.get::<Counter>().unwrap();
        let scope = provider.create_scope();
        let b = scope.get::<Counter>().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b), "scopes share root singletons");
    }

    #[test]
    fn transient_factory_runs_per_resolution() {
        let mut services = ServiceCollection::new();
        services.add_transient::<Counter, _>(|_| Ok(Arc::new(Counter(AtomicUsize::new(0)))));
        let provider = services.build();

        let a = provider.get::<Counter>().unwrap();
        let b = provider.get::<Counter>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn scoped_service_is_rejected_at_root() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let provider = collection_with_unit_of_work(&dropped).build();

        assert!(matches!(
            provider.get::<UnitOfWork>(),
            Err(ResolveError::ScopedFromRoot { .. })
        ));
    }

    #[test]
    fn scoped_instances_are_cached_per_scope_and_released_on_drop() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let provider = collection_with_unit_of_work(&dropped).build();

        let scope_a = provider.create_scope();
        let scope_b = provider.create_scope();
        let a1 = scope_a.get::<UnitOfWork>().unwrap();
        let a2 = scope_a.get::<UnitOfWork>().unwrap();
        let b1 = scope_b.get::<UnitOfWork>().unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b1));

        drop((a1, a2, b1));
        assert_eq!(dropped.load(Ordering::SeqCst), 0, "scopes still own them");

        drop(scope_a);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        drop(scope_b);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_scope_handles_refuse_to_resolve() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let provider = collection_with_unit_of_work(&dropped).build();

        let scope = provider.create_scope();
        let id = scope.id();
        let token = scope.disposal_token();
        let leaked = scope.services().clone();
        assert!(leaked.is_scoped());
        assert!(!token.is_cancelled());

        scope.dispose();

        assert!(token.is_cancelled());
        assert!(leaked.is_disposed());
        match leaked.get::<UnitOfWork>() {
            Err(ResolveError::ScopeDisposed { scope_id, .. }) => assert_eq!(scope_id, id),
            other => panic!("Expected ScopeDisposed, got {other:?}"),
        }
    }

    #[test]
    fn disposal_between_check_and_slot_lock_does_not_cache() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let provider = collection_with_unit_of_work(&dropped).build();

        let scope = provider.create_scope();
        let id = scope.id();
        let leaked = scope.services().clone();
        scope.dispose();

        // Resolve as a handle that already passed the disposed check would.
        let state = leaked.scope.as_ref().unwrap();
        let result =
            ServiceProvider::get_or_create(&state.instances[0], &leaked.root.descriptors[0], &leaked);

        match result {
            Err(ResolveError::ScopeDisposed { scope_id, type_key }) => {
                assert_eq!(scope_id, id);
                assert_eq!(type_key, TypeKey::of::<UnitOfWork>());
            }
            other => panic!("Expected ScopeDisposed, got {other:?}"),
        }
        assert!(state.instances[0].lock().is_none(), "disposed scope must stay empty");
        assert_eq!(dropped.load(Ordering::SeqCst), 0, "factory must not run");
    }

    #[test]
    fn factory_errors_are_wrapped_with_type() {
        let mut services = ServiceCollection::new();
        services.add_singleton_factory::<Counter, _>(|_| anyhow::bail!("boom"));
        let provider = services.build();

        let err = provider.get::<Counter>().unwrap_err();
        assert!(matches!(err, ResolveError::Factory { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn get_all_returns_every_registration_in_order() {
        trait Tag: Send + Sync {
            fn tag(&self) -> u8;
        }
        struct T(u8);
        impl Tag for T {
            fn tag(&self) -> u8 {
                self.0
            }
        }

        let mut services = ServiceCollection::new();
        services
            .add_singleton::<dyn Tag>(Arc::new(T(1)))
            .add_transient::<dyn Tag, _>(|_| Ok(Arc::new(T(2))))
            .add_singleton::<dyn Tag>(Arc::new(T(3)));
        let provider = services.build();

        let tags: Vec<u8> = provider
            .get_all::<dyn Tag>()
            .unwrap()
            .iter()
            .map(|t| t.tag())
            .collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert!(provider.get_all::<Counter>().unwrap().is_empty());
    }
}
