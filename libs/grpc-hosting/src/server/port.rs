use std::{fmt, str::FromStr};

use serde::Deserialize;

/// A host/port pair the server listens on. Port `0` asks the OS for an ephemeral port.
///
/// Parses from `"host:port"`, and `"[v6-addr]:port"` for IPv6 literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ServerPort {
    host: String,
    port: u16,
}

/// Why a listen address could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid listen address '{addr}': {reason}")]
pub struct InvalidServerPort {
    pub addr: String,
    pub reason: &'static str,
}

impl ServerPort {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback on an ephemeral port; mostly for tests.
    #[must_use]
    pub fn localhost_ephemeral() -> Self {
        Self::new("127.0.0.1", 0)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerPort {
    type Err = InvalidServerPort;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidServerPort {
            addr: s.to_owned(),
            reason,
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = match host.strip_prefix('[') {
            Some(rest) => rest
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?,
            None if host.contains(':') => return Err(invalid("IPv6 literal must be bracketed")),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("port is not a u16"))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ServerPort {
    type Error = InvalidServerPort;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
