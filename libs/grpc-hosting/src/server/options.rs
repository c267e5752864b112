use std::time::Duration;

use serde::Deserialize;
use tonic::transport::Server;

/// Server-level transport options applied to every listener of a [`GrpcServer`].
///
/// All fields are optional; unset fields keep tonic's defaults.
///
/// [`GrpcServer`]: super::GrpcServer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    /// Max in-flight requests per connection.
    pub concurrency_limit_per_connection: Option<usize>,
    /// Per-request timeout.
    pub timeout_ms: Option<u64>,
    /// Max concurrent HTTP/2 streams per connection.
    pub max_concurrent_streams: Option<u32>,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub http2_keepalive_interval_ms: Option<u64>,
    pub http2_keepalive_timeout_ms: Option<u64>,
    /// Accept HTTP/1.1 (needed for gRPC-Web).
    pub accept_http1: bool,
}

impl ServerOptions {
    /// Build a tonic server builder configured with these options.
    pub(super) fn builder(&self) -> Server {
        let mut builder = Server::builder().accept_http1(self.accept_http1);

        if let Some(limit) = self.concurrency_limit_per_connection {
            builder = builder.concurrency_limit_per_connection(limit);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(max) = self.max_concurrent_streams {
            builder = builder.max_concurrent_streams(max);
        }
        if let Some(sz) = self.initial_stream_window_size {
            builder = builder.initial_stream_window_size(sz);
        }
        if let Some(sz) = self.initial_connection_window_size {
            builder = builder.initial_connection_window_size(sz);
        }
        if let Some(sz) = self.max_frame_size {
            builder = builder.max_frame_size(sz);
        }
        if self.http2_keepalive_interval_ms.is_some() {
            builder = builder
                .http2_keepalive_interval(self.http2_keepalive_interval_ms.map(Duration::from_millis));
        }
        if self.http2_keepalive_timeout_ms.is_some() {
            builder = builder
                .http2_keepalive_timeout(self.http2_keepalive_timeout_ms.map(Duration::from_millis));
        }

        builder
    }
}
