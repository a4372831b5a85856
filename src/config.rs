//! Bridge configuration.
//!
//! The bridge process learns where to publish from its environment:
//!
//! | Variable | Required | Meaning |
//! |----------|----------|---------|
//! | `PROBEKIT_BRIDGE_PORT` | yes | Registry port, 1-65535 |
//! | `PROBEKIT_BRIDGE_HOST` | no | Listen address (default `127.0.0.1`) |
//! | `PROBEKIT_BRIDGE_DRAIN_MS` | no | In-flight drain timeout on shutdown |
//!
//! A missing or malformed value is a configuration error and is never
//! retried.

use crate::constants::{BRIDGE_DRAIN_ENV, BRIDGE_HOST_ENV, BRIDGE_PORT_ENV, DEFAULT_BRIDGE_HOST, DEFAULT_DRAIN_TIMEOUT};
use crate::error::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Where and how a bridge registry is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Listen address.
    pub host: IpAddr,
    /// Registry port. 0 binds an ephemeral port.
    pub port: u16,
    /// How long in-flight calls may run after shutdown begins.
    pub drain_timeout: Duration,
}

impl BridgeConfig {
    /// Creates a config for `port` on the default host.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_BRIDGE_HOST,
            port,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Reads the config from the process environment.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the port is missing or any value is
    /// malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the config through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the port is missing or any value is
    /// malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_port = lookup(BRIDGE_PORT_ENV).ok_or_else(|| Error::Configuration {
            key: BRIDGE_PORT_ENV.to_string(),
            reason: "not set".to_string(),
        })?;
        let port = parse_port(&raw_port)?;
        let mut config = Self::new(port);

        if let Some(raw) = lookup(BRIDGE_HOST_ENV) {
            config.host = raw.trim().parse().map_err(|e| Error::Configuration {
                key: BRIDGE_HOST_ENV.to_string(),
                reason: format!("'{raw}' is not an IP address: {e}"),
            })?;
        }

        if let Some(raw) = lookup(BRIDGE_DRAIN_ENV) {
            let millis: u64 = raw.trim().parse().map_err(|e| Error::Configuration {
                key: BRIDGE_DRAIN_ENV.to_string(),
                reason: format!("'{raw}' is not a number of milliseconds: {e}"),
            })?;
            config.drain_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Socket address to bind.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    let invalid = |reason: String| Error::Configuration {
        key: BRIDGE_PORT_ENV.to_string(),
        reason,
    };
    let port: u16 = raw
        .trim()
        .parse()
        .map_err(|e| invalid(format!("'{raw}' is not a port number: {e}")))?;
    if port == 0 {
        return Err(invalid("port 0 is not allowed".to_string()));
    }
    Ok(port)
}
