//! Composite test container.
//!
//! Fans every operation out across an ordered list of targets, one target
//! at a time, in list order.
//!
//! # Failure Policy
//!
//! Every operation except [`cleanup`](TestContainer::cleanup) is fail-fast:
//! the first target that faults aborts the call, later targets are not
//! touched, and the fault comes back as [`Error::Composite`] carrying the
//! zero-based target index. Targets already visited keep whatever changes
//! the call made; `cleanup` is the way back to a clean slate. Cleanup visits
//! every target regardless and reports all failures together.
//!
//! # Bundle Ids
//!
//! `install` installs into every target and hands out a composite id that
//! maps to each target's own id. Operations taking an id translate known
//! composite ids per target; any other id is passed unchanged to every
//! target.

use crate::constants::COMPOSITE_ID_BASE;
use crate::container::{BundleId, BundleSource, BundleState, TestContainer};
use crate::error::{Error, Result, TargetFailure};
use crate::options::OptionDescription;
use crate::service::{BroadcastService, Capability, Multiplexed, Service, ServiceQuery};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Test container that forwards to N targets.
pub struct CompositeTestContainer {
    name: String,
    targets: Vec<Arc<dyn TestContainer>>,
    bundles: Mutex<HashMap<BundleId, Vec<BundleId>>>,
    next_id: AtomicU64,
}

impl CompositeTestContainer {
    /// Creates a composite over `targets`, visited in the given order.
    #[must_use]
    pub fn new(name: impl Into<String>, targets: Vec<Arc<dyn TestContainer>>) -> Self {
        Self {
            name: name.into(),
            targets,
            bundles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(COMPOSITE_ID_BASE),
        }
    }

    /// The targets, in fan-out order.
    #[must_use]
    pub fn targets(&self) -> &[Arc<dyn TestContainer>] {
        &self.targets
    }

    /// Per-target ids behind a composite id, or `None` if `id` was not
    /// issued by this composite.
    #[must_use]
    pub fn target_bundle_ids(&self, id: BundleId) -> Option<Vec<BundleId>> {
        self.bundle_table().get(&id).cloned()
    }

    /// Looks up capability `C` on every target and returns a typed handle
    /// that calls all of them.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] with no targets; otherwise the first target
    /// lookup failure, as [`Error::Composite`].
    pub async fn get_multiplexed<C: Capability>(
        &self,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<Multiplexed<C>> {
        self.require_targets("get_service")?;
        let mut query = ServiceQuery::of::<C>();
        query.filter = filter.map(str::to_string);
        Ok(Multiplexed::new(self.lookup_all(&query, timeout).await?))
    }

    fn bundle_table(&self) -> std::sync::MutexGuard<'_, HashMap<BundleId, Vec<BundleId>>> {
        self.bundles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Id to hand target `index` for composite-level `id`.
    fn target_id(&self, id: BundleId, index: usize) -> BundleId {
        self.bundle_table()
            .get(&id)
            .and_then(|ids| ids.get(index).copied())
            .unwrap_or(id)
    }

    fn require_targets(&self, operation: &str) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::NotSupported(format!(
                "{operation} on composite '{}' with no targets",
                self.name
            )));
        }
        Ok(())
    }

    async fn lookup_all(&self, query: &ServiceQuery, timeout: Duration) -> Result<Vec<Arc<dyn Service>>> {
        let deadline = Instant::now() + timeout;
        let mut services = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let service = target
                .get_service(query, remaining)
                .await
                .map_err(|e| e.at_target(index, "get_service"))?;
            services.push(service);
        }
        Ok(services)
    }
}

#[async_trait]
impl TestContainer for CompositeTestContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn option_description(&self) -> OptionDescription {
        self.targets
            .iter()
            .fold(OptionDescription::default(), |mut acc, target| {
                acc.merge(target.option_description());
                acc
            })
    }

    async fn start(&self) -> Result<()> {
        for (index, target) in self.targets.iter().enumerate() {
            target.start().await.map_err(|e| e.at_target(index, "start"))?;
        }
        debug!(composite = %self.name, targets = self.targets.len(), "composite started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        for (index, target) in self.targets.iter().enumerate() {
            target.stop().await.map_err(|e| e.at_target(index, "stop"))?;
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let mut failures = Vec::new();
        for (index, target) in self.targets.iter().enumerate() {
            if let Err(error) = target.cleanup().await {
                warn!(composite = %self.name, target = %target.name(), index, error = %error, "cleanup failed");
                failures.push(TargetFailure { index, error });
            }
        }
        self.bundle_table().clear();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CleanupFailed { failures })
        }
    }

    async fn install(&self, source: BundleSource) -> Result<BundleId> {
        self.require_targets("install")?;
        let mut ids = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let id = target
                .install(source.clone())
                .await
                .map_err(|e| e.at_target(index, "install"))?;
            ids.push(id);
        }

        let id = BundleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(composite = %self.name, bundle = %id, targets = ?ids, "composite install");
        self.bundle_table().insert(id, ids);
        Ok(id)
    }

    async fn start_bundle(&self, id: BundleId) -> Result<()> {
        for (index, target) in self.targets.iter().enumerate() {
            target
                .start_bundle(self.target_id(id, index))
                .await
                .map_err(|e| e.at_target(index, "start_bundle"))?;
        }
        Ok(())
    }

    /// Least advanced state across all targets.
    async fn bundle_state(&self, id: BundleId) -> Result<BundleState> {
        self.require_targets("bundle_state")?;
        let mut least: Option<BundleState> = None;
        for (index, target) in self.targets.iter().enumerate() {
            let state = target
                .bundle_state(self.target_id(id, index))
                .await
                .map_err(|e| e.at_target(index, "bundle_state"))?;
            if least.is_none_or(|l| state.progress() < l.progress()) {
                least = Some(state);
            }
        }
        least.ok_or(Error::BundleNotFound(id.value()))
    }

    async fn set_bundle_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        for (index, target) in self.targets.iter().enumerate() {
            target
                .set_bundle_start_level(self.target_id(id, index), level)
                .await
                .map_err(|e| e.at_target(index, "set_bundle_start_level"))?;
        }
        Ok(())
    }

    /// Waits on each target in turn against one shared deadline.
    async fn wait_for_state(&self, id: BundleId, expected: BundleState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for (index, target) in self.targets.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            target
                .wait_for_state(self.target_id(id, index), expected, remaining)
                .await
                .map_err(|e| e.at_target(index, "wait_for_state"))?;
        }
        Ok(())
    }

    /// Returns a service that broadcasts every call to all targets.
    ///
    /// Invoking it yields a JSON array with one result per target.
    async fn get_service(&self, query: &ServiceQuery, timeout: Duration) -> Result<Arc<dyn Service>> {
        self.require_targets("get_service")?;
        let services = self.lookup_all(query, timeout).await?;
        Ok(Arc::new(BroadcastService::new(query.clone(), services)))
    }
}
