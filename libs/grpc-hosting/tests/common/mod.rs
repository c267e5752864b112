#![allow(dead_code)]

//! Shared test services: hand-written stand-ins for `tonic-build` output.

use std::{
    convert::Infallible,
    future,
    sync::Arc,
    task::{Context, Poll},
};

use grpc_hosting::{
    BindService, FromServices, ServiceDefinition, ServiceProvider, register_service_binder,
};
use http::{Request, Response};
use tonic::{body::Body, server::NamedService};
use tower::Service;

pub const GREETER: &str = "grpc_hosting.test.Greeter";
pub const ECHO: &str = "grpc_hosting.test.Echo";

/// Greeting configured in the container and read by [`GreeterImpl`].
pub struct Greeting(pub String);

pub struct GreeterImpl {
    pub greeting: String,
}

impl FromServices for GreeterImpl {
    fn from_services(services: &ServiceProvider) -> anyhow::Result<Self> {
        let greeting = services.get::<Greeting>()?;
        Ok(Self {
            greeting: greeting.0.clone(),
        })
    }
}

impl BindService for GreeterImpl {
    fn bind_service(self: Arc<Self>) -> ServiceDefinition {
        ServiceDefinition::new(GreeterServer(self))
    }
}

register_service_binder!(GreeterImpl);

#[derive(Default)]
pub struct EchoImpl;

impl FromServices for EchoImpl {
    fn from_services(_services: &ServiceProvider) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

register_service_binder!(EchoImpl, |svc| ServiceDefinition::new(EchoServer(svc)));

/// Implementation type without any binder.
pub struct UnboundImpl;

impl FromServices for UnboundImpl {
    fn from_services(_services: &ServiceProvider) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[derive(Clone)]
pub struct GreeterServer(pub Arc<GreeterImpl>);

#[derive(Clone)]
pub struct EchoServer(pub Arc<EchoImpl>);

impl NamedService for GreeterServer {
    const NAME: &'static str = GREETER;
}

impl NamedService for EchoServer {
    const NAME: &'static str = ECHO;
}

macro_rules! empty_grpc_service {
    ($server:ty) => {
        impl Service<Request<Body>> for $server {
            type Response = Response<Body>;
            type Error = Infallible;
            type Future = future::Ready<Result<Self::Response, Self::Error>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _req: Request<Body>) -> Self::Future {
                future::ready(Ok(Response::new(Body::empty())))
            }
        }
    };
}

empty_grpc_service!(GreeterServer);
empty_grpc_service!(EchoServer);
