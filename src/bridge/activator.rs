//! Publishes a framework's bridge.
//!
//! [`BridgeActivator`] owns the published bridge from `start` to `stop`: it
//! creates the registry, builds exactly one [`RemoteBundleContext`], binds it
//! under [`BRIDGE_BINDING_NAME`], and holds the only strong references the
//! process keeps to either.

use super::context::{RemoteBundleContext, RemoteObject};
use super::registry::BridgeRegistry;
use crate::config::BridgeConfig;
use crate::constants::BRIDGE_BINDING_NAME;
use crate::error::{Error, Result};
use crate::framework::Framework;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

struct Publication {
    registry: BridgeRegistry,
    context: Arc<RemoteBundleContext>,
}

/// Lifecycle owner of one published bridge.
pub struct BridgeActivator {
    config: BridgeConfig,
    publication: Option<Publication>,
}

impl BridgeActivator {
    /// Creates an activator publishing per `config`.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            publication: None,
        }
    }

    /// Creates an activator configured from the environment.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the bridge port is missing or invalid.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(BridgeConfig::from_env()?))
    }

    /// Publishes a bridge over `framework` and returns the registry address.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] if already published,
    /// [`Error::RegistryBindFailed`] if the port is taken.
    pub async fn start(&mut self, framework: Arc<Framework>) -> Result<SocketAddr> {
        if self.publication.is_some() {
            return Err(Error::AlreadyStarted(BRIDGE_BINDING_NAME.to_string()));
        }

        let registry = BridgeRegistry::create_with_drain(self.config.socket_addr(), self.config.drain_timeout).await?;
        let context = Arc::new(RemoteBundleContext::new(framework));
        let object: Arc<dyn RemoteObject> = context.clone();
        if let Err(e) = registry.bind(BRIDGE_BINDING_NAME, object) {
            registry.shutdown().await;
            return Err(e);
        }

        let addr = registry.local_addr();
        info!(addr = %addr, name = BRIDGE_BINDING_NAME, "bridge published");
        self.publication = Some(Publication { registry, context });
        Ok(addr)
    }

    /// Unbinds and unexports the bridge, then drains and joins every
    /// registry task. Does nothing if not published.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(Publication { registry, context }) = self.publication.take() else {
            return Ok(());
        };

        if let Err(e) = registry.unbind(BRIDGE_BINDING_NAME) {
            warn!(error = %e, "bridge was not bound at stop");
        }
        context.unexport();
        registry.shutdown().await;
        info!(addr = %registry.local_addr(), "bridge withdrawn");
        Ok(())
    }

    /// Returns true while the bridge is published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.publication.is_some()
    }

    /// Registry address while published.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.publication.as_ref().map(|p| p.registry.local_addr())
    }

    /// The activator's configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
