//! In-process test container.
//!
//! Wraps a [`Framework`] living in the driver's own process. Nothing crosses
//! a process boundary, so every operation maps one-to-one onto a framework
//! call.

use crate::constants::DEFAULT_POLL_INTERVAL;
use crate::container::{BundleId, BundleSource, BundleState, TestContainer, poll_until};
use crate::error::Result;
use crate::filter::Filter;
use crate::framework::Framework;
use crate::options::{ContainerOption, OptionDescription};
use crate::service::{Service, ServiceQuery};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Test container backed by an in-process [`Framework`].
///
/// Consumes boot delegation, system property and provision options; custom
/// options are ignored.
pub struct LocalTestContainer {
    name: String,
    framework: Arc<Framework>,
    options: Vec<ContainerOption>,
}

impl LocalTestContainer {
    /// Creates a container over a fresh framework named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let framework = Arc::new(Framework::new(name.clone()));
        Self::with_framework(name, framework)
    }

    /// Creates a container over an existing framework.
    #[must_use]
    pub fn with_framework(name: impl Into<String>, framework: Arc<Framework>) -> Self {
        Self {
            name: name.into(),
            framework,
            options: Vec::new(),
        }
    }

    /// Sets the container options applied on start.
    #[must_use]
    pub fn with_options(mut self, options: Vec<ContainerOption>) -> Self {
        self.options = options;
        self
    }

    /// The framework behind this container.
    #[must_use]
    pub fn framework(&self) -> &Arc<Framework> {
        &self.framework
    }

    fn accepts(option: &ContainerOption) -> bool {
        !matches!(option, ContainerOption::Custom { .. })
    }
}

#[async_trait]
impl TestContainer for LocalTestContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn option_description(&self) -> OptionDescription {
        OptionDescription::partition(&self.options, Self::accepts)
    }

    async fn start(&self) -> Result<()> {
        for option in &self.options {
            match option {
                ContainerOption::BootDelegation { package } => {
                    self.framework.add_boot_delegation(package.clone());
                }
                ContainerOption::SystemProperty { key, value } => {
                    self.framework.set_property(key.clone(), value.clone());
                }
                _ => {}
            }
        }
        self.framework.start()?;

        for option in &self.options {
            if let ContainerOption::Provision { location } = option {
                let id = self.framework.install(&BundleSource::location(location.clone()))?;
                self.framework.start_bundle(id)?;
                debug!(container = %self.name, bundle = %id, location = %location, "provisioned");
            }
        }
        info!(container = %self.name, options = self.options.len(), "local container started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.framework.stop()
    }

    async fn cleanup(&self) -> Result<()> {
        self.framework.reset();
        Ok(())
    }

    async fn install(&self, source: BundleSource) -> Result<BundleId> {
        self.framework.install(&source)
    }

    async fn start_bundle(&self, id: BundleId) -> Result<()> {
        self.framework.start_bundle(id)
    }

    async fn bundle_state(&self, id: BundleId) -> Result<BundleState> {
        self.framework.bundle_state(id)
    }

    async fn set_bundle_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        self.framework.set_start_level(id, level)
    }

    async fn get_service(&self, query: &ServiceQuery, timeout: Duration) -> Result<Arc<dyn Service>> {
        let filter = query.filter.as_deref().map(Filter::parse).transpose()?;
        let operation = format!("lookup of service '{}' in {}", query.type_name, self.name);
        poll_until(&operation, timeout, DEFAULT_POLL_INTERVAL, || {
            let found = self.framework.find_service(&query.type_name, filter.as_ref());
            async move { Ok(found) }
        })
        .await
    }
}
