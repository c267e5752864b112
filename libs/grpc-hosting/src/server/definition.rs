use std::{convert::Infallible, fmt};

use http::{Request, Response};
use tonic::{body::Body, codegen::Service, server::NamedService, service::RoutesBuilder};

type Installer = Box<dyn Fn(&mut RoutesBuilder) + Send + Sync>;

/// A bindable gRPC service: its fully-qualified name plus an installer that adds it to
/// a route table.
///
/// Code generated by `tonic-build` produces `XServer<T>` types that satisfy the bounds of
/// [`ServiceDefinition::new`], so binding is usually `ServiceDefinition::new(XServer::from_arc(svc))`.
pub struct ServiceDefinition {
    service_name: &'static str,
    install: Installer,
}

impl ServiceDefinition {
    #[must_use]
    pub fn new<S>(service: S) -> Self
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            service_name: S::NAME,
            install: Box::new(move |routes| {
                routes.add_service(service.clone());
            }),
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    pub(super) fn install(&self, routes: &mut RoutesBuilder) {
        (self.install)(routes);
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}
