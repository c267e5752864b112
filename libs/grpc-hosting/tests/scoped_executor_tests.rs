#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Scoped execution against a full container, including work spawned on the runtime.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use grpc_hosting::{ResolveError, ScopedExecutor, ServiceCollection, ServiceProvider};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Repository {
    opened: AtomicUsize,
}

struct RequestContext {
    id: Uuid,
    repo: Arc<Repository>,
    services: ServiceProvider,
    released: CancellationToken,
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.released.cancel();
    }
}

fn container() -> ServiceProvider {
    let mut services = ServiceCollection::new();
    services.add_singleton(Arc::new(Repository {
        opened: AtomicUsize::new(0),
    }));
    services.add_scoped(|services| {
        let repo = services.get::<Repository>()?;
        repo.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RequestContext {
            id: Uuid::new_v4(),
            repo,
            services: services.clone(),
            released: CancellationToken::new(),
        }))
    });
    services.build()
}

#[tokio::test]
async fn concurrent_executions_use_separate_scopes() {
    let executor = ScopedExecutor::new(container());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute_async(|ctx: Arc<RequestContext>| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        let again = ctx.services.get::<RequestContext>().unwrap();
                        assert_eq!(again.id, ctx.id);
                        (ctx.id, ctx.released.clone())
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let (id, released) = handle.await.unwrap();
        assert!(released.is_cancelled(), "scope should be released after the call");
        ids.insert(id);
    }
    assert_eq!(ids.len(), 8);

    let repo = executor.services().get::<Repository>().unwrap();
    assert_eq!(repo.opened.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn scope_is_released_after_handler_future_settles() {
    let executor = ScopedExecutor::new(container());

    let released = executor
        .execute_async(|ctx: Arc<RequestContext>| async move {
            let released = ctx.released.clone();
            tokio::task::yield_now().await;
            assert!(!released.is_cancelled());
            assert!(!ctx.services.is_disposed());
            assert!(ctx.services.get::<Repository>().is_ok());
            released
        })
        .await
        .unwrap();

    assert!(released.is_cancelled());
}

#[test]
fn scoped_dependency_is_not_resolvable_from_root() {
    let executor = ScopedExecutor::new(container());

    assert!(matches!(
        executor.services().get::<RequestContext>(),
        Err(ResolveError::ScopedFromRoot { .. })
    ));

    let scoped_repo = executor
        .execute(|ctx: Arc<RequestContext>| Arc::clone(&ctx.repo))
        .unwrap();
    let root_repo = executor.services().get::<Repository>().unwrap();
    assert!(Arc::ptr_eq(&scoped_repo, &root_repo));
}

#[tokio::test]
async fn unregistered_dependency_error_reaches_caller() {
    let executor = ScopedExecutor::new(ServiceCollection::new().build());

    let err = executor
        .execute_async(|_: Arc<RequestContext>| async {})
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::NotRegistered { .. }));
    assert!(err.to_string().contains("RequestContext"));
}
