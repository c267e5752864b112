//! Listener configuration for a hosted gRPC server.
//!
//! ```yaml
//! grpc:
//!   ports: ["0.0.0.0:50051", "[::1]:50052"]
//!   options:
//!     max_concurrent_streams: 128
//!     timeout_ms: 5000
//! ```
//!
//! Loaded with `figment`: defaults, then an optional YAML file, then environment
//! variables prefixed `GRPC_HOSTING__` with `__` separating nested keys
//! (`GRPC_HOSTING__GRPC__OPTIONS__ACCEPT_HTTP1=true`).

use std::{collections::HashSet, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::server::{ServerOptions, ServerPort};

/// Environment variable prefix read by [`GrpcServerConfig::load`].
pub const ENV_PREFIX: &str = "GRPC_HOSTING__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load gRPC server config: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("gRPC listen address {0} is configured more than once")]
    DuplicatePort(ServerPort),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrpcServerConfig {
    pub ports: Vec<ServerPort>,
    pub options: ServerOptions,
}

impl GrpcServerConfig {
    /// Extract the section at `key`. A missing section yields the defaults.
    ///
    /// # Errors
    /// `Load` if the section is malformed; `DuplicatePort` if a listen address repeats.
    pub fn from_figment(figment: &Figment, key: &str) -> Result<Self, ConfigError> {
        if !figment.contains(key) {
            tracing::debug!(key, "gRPC server config section absent; using defaults");
            return Ok(Self::default());
        }
        let config: Self = figment.extract_inner(key)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional YAML file and `GRPC_HOSTING__*` environment variables, then
    /// extract the section at `key`.
    ///
    /// # Errors
    /// See [`from_figment`](Self::from_figment).
    pub fn load(path: Option<&Path>, key: &str) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            tracing::info!(path = %path.display(), "Loading gRPC server config");
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment, key)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::with_capacity(self.ports.len());
        for port in &self.ports {
            if !seen.insert(port) {
                return Err(ConfigError::DuplicatePort(port.clone()));
            }
        }
        Ok(())
    }
}
