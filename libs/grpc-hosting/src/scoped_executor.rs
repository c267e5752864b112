//! Run a unit of work inside a fresh dependency scope.
//!
//! Every call creates a child scope, resolves the handler's dependency from it, runs the
//! handler and disposes the scope. The scope guard lives on the call's stack (or inside
//! the returned future), so it is released on return, on error, on panic unwinding and
//! when an async call is dropped before completion.

use std::{future::Future, sync::Arc};

use crate::provider::{ResolveError, ServiceProvider};

#[derive(Debug, Clone)]
pub struct ScopedExecutor {
    services: ServiceProvider,
}

impl ScopedExecutor {
    #[must_use]
    pub fn new(services: ServiceProvider) -> Self {
        Self { services }
    }

    #[must_use]
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    /// Resolve `T` in a new scope and pass it to `handler`.
    ///
    /// # Errors
    /// The container's [`ResolveError`] if `T` cannot be resolved; the handler is not run.
    pub fn execute<T, R, F>(&self, handler: F) -> Result<R, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> R,
    {
        let scope = self.services.create_scope();
        let dependency = scope.get::<T>()?;
        Ok(handler(dependency))
    }

    /// Like [`execute`](Self::execute) for fallible handlers.
    ///
    /// # Errors
    /// The handler's own error, or a resolution failure converted into `E`.
    pub fn try_execute<T, R, E, F>(&self, handler: F) -> Result<R, E>
    where
        T: ?Sized + Send + Sync + 'static,
        E: From<ResolveError>,
        F: FnOnce(Arc<T>) -> Result<R, E>,
    {
        let scope = self.services.create_scope();
        let dependency = scope.get::<T>()?;
        handler(dependency)
    }

    /// Resolve `T` in a new scope and await `handler`. The scope is disposed only after
    /// the handler's future settles, or when the returned future is dropped.
    ///
    /// # Errors
    /// The container's [`ResolveError`] if `T` cannot be resolved; the handler is not run.
    pub async fn execute_async<T, R, F, Fut>(&self, handler: F) -> Result<R, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        let scope = self.services.create_scope();
        let dependency = scope.get::<T>()?;
        let output = handler(dependency).await;
        drop(scope);
        Ok(output)
    }

    /// Like [`execute_async`](Self::execute_async) for fallible handlers.
    ///
    /// # Errors
    /// The handler's own error, or a resolution failure converted into `E`.
    pub async fn try_execute_async<T, R, E, F, Fut>(&self, handler: F) -> Result<R, E>
    where
        T: ?Sized + Send + Sync + 'static,
        E: From<ResolveError>,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let scope = self.services.create_scope();
        let dependency = scope.get::<T>()?;
        let output = handler(dependency).await;
        drop(scope);
        output
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::ServiceCollection;
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    struct UnitOfWork {
        services: ServiceProvider,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for UnitOfWork {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Clock(u64);

    #[derive(Debug, thiserror::Error)]
    enum JobError {
        #[error("job failed")]
        Failed,
        #[error(transparent)]
        Resolve(#[from] ResolveError),
    }

    fn executor(drops: &Arc<AtomicUsize>) -> ScopedExecutor {
        let drops = Arc::clone(drops);
        let mut services = ServiceCollection::new();
        services.add_singleton(Arc::new(Clock(42)));
        services.add_scoped(move |services| {
            Ok(Arc::new(UnitOfWork {
                services: services.clone(),
                drops: Arc::clone(&drops),
            }))
        });
        ScopedExecutor::new(services.build())
    }

    #[test]
    fn execute_returns_handler_value_and_releases_scope() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let scoped = executor
            .execute(|uow: Arc<UnitOfWork>| {
                assert!(!uow.services.is_disposed());
                uow.services.clone()
            })
            .unwrap();

        assert!(scoped.is_disposed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_call_gets_a_fresh_scope() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        executor.execute(|_: Arc<UnitOfWork>| ()).unwrap();
        executor.execute(|_: Arc<UnitOfWork>| ()).unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resolution_failure_is_propagated_without_running_handler() {
        let executor = ScopedExecutor::new(ServiceCollection::new().build());
        let mut ran = false;

        let err = executor
            .execute(|_: Arc<UnitOfWork>| ran = true)
            .unwrap_err();

        assert!(matches!(err, ResolveError::NotRegistered { .. }));
        assert!(!ran);
    }

    #[test]
    fn handler_error_is_returned_unchanged_and_scope_released_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let err = executor
            .try_execute(|_: Arc<UnitOfWork>| Err::<(), _>(JobError::Failed))
            .unwrap_err();

        assert!(matches!(err, JobError::Failed));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_execute_converts_resolution_failure() {
        let executor = ScopedExecutor::new(ServiceCollection::new().build());

        let err = executor
            .try_execute(|_: Arc<Clock>| Ok::<_, JobError>(()))
            .unwrap_err();

        assert!(matches!(
            err,
            JobError::Resolve(ResolveError::NotRegistered { .. })
        ));
    }

    #[test]
    fn panicking_handler_still_releases_scope() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            executor.execute(|_: Arc<UnitOfWork>| panic!("handler panicked"))
        }));

        assert!(result.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_scope_stays_alive_until_future_settles() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let scoped = executor
            .execute_async(|uow: Arc<UnitOfWork>| async move {
                tokio::task::yield_now().await;
                assert!(!uow.services.is_disposed());
                let clock = uow.services.get::<Clock>().unwrap();
                assert_eq!(clock.0, 42);
                let again = uow.services.get::<UnitOfWork>().unwrap();
                assert!(Arc::ptr_eq(&uow, &again));
                uow.services.clone()
            })
            .await
            .unwrap();

        assert!(scoped.is_disposed());
        assert!(matches!(
            scoped.get::<UnitOfWork>(),
            Err(ResolveError::ScopeDisposed { .. })
        ));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_handler_error_releases_scope_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let err = executor
            .try_execute_async(|_: Arc<UnitOfWork>| async { Err::<(), _>(JobError::Failed) })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Failed));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_async_call_releases_scope() {
        let drops = Arc::new(AtomicUsize::new(0));
        let executor = executor(&drops);

        let pending = executor.execute_async(|_: Arc<UnitOfWork>| std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
