//! Test container trait - the lifecycle contract every backend implements.
//!
//! A test container hosts deployable bundles and a service registry. The
//! driver installs probe bundles, starts them, looks up the services they
//! publish to trigger test execution, and tears everything down again:
//!
//! ```text
//! start() → install(source) → start_bundle(id) → wait_for_state(id, Active)
//!         → get_service(query) → ... → stop() → cleanup()
//! ```
//!
//! # Bundle Lifecycle
//!
//! ```text
//!   ┌───────────┐  resolve  ┌──────────┐  start  ┌──────────┐        ┌────────┐
//!   │ Installed │ ────────► │ Resolved │ ──────► │ Starting │ ─────► │ Active │
//!   └───────────┘           └──────────┘         └──────────┘        └───┬────┘
//!                                ▲                                       │ stop
//!                                │           ┌──────────┐                │
//!                                └────────── │ Stopping │ ◄──────────────┘
//!                                            └──────────┘
//!
//!   any state ──uninstall──► Uninstalled
//! ```
//!
//! [`TestContainer::wait_for_state`] is the only primitive that observes this
//! machine. It polls; there is no event subscription.

use crate::constants::DEFAULT_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::options::OptionDescription;
use crate::service::{Capability, Service, ServiceHandle, ServiceQuery};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Bundle Identity
// =============================================================================

/// Backend-scoped bundle identifier.
///
/// Ids are only meaningful to the container that issued them; they are
/// never globally unique across a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl BundleId {
    /// Raw numeric value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BundleId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// =============================================================================
// Bundle State
// =============================================================================

/// Lifecycle state of a deployed bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleState {
    /// Installed but dependencies not yet resolved.
    Installed,
    /// Dependencies resolved, not running.
    Resolved,
    /// Activation in progress.
    Starting,
    /// Running.
    Active,
    /// Deactivation in progress.
    Stopping,
    /// Removed from the container.
    Uninstalled,
}

impl BundleState {
    /// Returns true if the lifecycle allows moving from `self` to `target`.
    #[must_use]
    pub fn can_transition_to(self, target: BundleState) -> bool {
        use BundleState::*;
        matches!(
            (self, target),
            (Installed, Resolved)
                | (Resolved, Starting)
                | (Starting, Active)
                | (Starting, Resolved)
                | (Active, Stopping)
                | (Stopping, Resolved)
                | (Installed | Resolved | Starting | Active | Stopping, Uninstalled)
        )
    }

    /// Position along the start path, used to find the least advanced of
    /// several states.
    #[must_use]
    pub fn progress(self) -> u8 {
        match self {
            Self::Uninstalled => 0,
            Self::Installed => 1,
            Self::Resolved => 2,
            Self::Stopping => 3,
            Self::Starting => 4,
            Self::Active => 5,
        }
    }
}

impl std::fmt::Display for BundleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Resolved => write!(f, "resolved"),
            Self::Starting => write!(f, "starting"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Uninstalled => write!(f, "uninstalled"),
        }
    }
}

// =============================================================================
// Install Source
// =============================================================================

/// What to install.
#[derive(Clone, PartialEq, Eq)]
pub enum BundleSource {
    /// A location the backend resolves itself (`file:`, `mvn:`, `http:` ...).
    Location(String),
    /// A raw bundle archive, recorded under `location`.
    Bytes {
        /// Location the bundle is recorded under.
        location: String,
        /// Archive contents.
        content: Vec<u8>,
    },
}

impl BundleSource {
    /// Creates a location source.
    #[must_use]
    pub fn location(location: impl Into<String>) -> Self {
        Self::Location(location.into())
    }

    /// Creates a byte payload source.
    #[must_use]
    pub fn bytes(location: impl Into<String>, content: Vec<u8>) -> Self {
        Self::Bytes {
            location: location.into(),
            content,
        }
    }

    /// Location the bundle is installed under.
    #[must_use]
    pub fn location_str(&self) -> &str {
        match self {
            Self::Location(location) | Self::Bytes { location, .. } => location,
        }
    }
}

impl std::fmt::Debug for BundleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location(location) => f.debug_tuple("Location").field(location).finish(),
            Self::Bytes { location, content } => f
                .debug_struct("Bytes")
                .field("location", location)
                .field("len", &content.len())
                .finish(),
        }
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Polls `probe` until it yields a value or `timeout` elapses.
///
/// Every probe and every sleep is bounded by the remaining budget, so the
/// call returns no later than `timeout` plus one poll interval. A probe
/// still pending at the deadline is dropped.
///
/// # Errors
///
/// Propagates any error from `probe`; returns [`Error::Timeout`] on expiry.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let polled = tokio::time::timeout(remaining, probe())
            .await
            .map_err(|_| Error::timeout(operation, timeout))?;
        if let Some(value) = polled? {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(operation, timeout));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

// =============================================================================
// Test Container Trait
// =============================================================================

/// An isolated runtime able to host probe bundles.
///
/// # Implementations
///
/// - `LocalTestContainer`: in-process runtime
/// - `RemoteTestContainer`: runtime in another process, reached via a bridge
/// - `CompositeTestContainer`: fans every call out across several containers
///
/// # Idempotence
///
/// `start()` and `stop()` are not guaranteed idempotent. `cleanup()` is:
/// calling it on an already clean container succeeds.
#[async_trait]
pub trait TestContainer: Send + Sync {
    /// Returns the container name used in logs and errors.
    fn name(&self) -> &str;

    /// Reports which of the container's options it consumed.
    fn option_description(&self) -> OptionDescription {
        OptionDescription::default()
    }

    // =========================================================================
    // Container Lifecycle
    // =========================================================================

    /// Brings the container runtime up.
    async fn start(&self) -> Result<()>;

    /// Brings the container runtime down.
    async fn stop(&self) -> Result<()>;

    /// Releases every resource the container holds.
    ///
    /// Runs even if `stop()` never succeeded. Must succeed for an already
    /// clean container.
    async fn cleanup(&self) -> Result<()>;

    // =========================================================================
    // Bundle Operations
    // =========================================================================

    /// Deploys a bundle and returns its backend-scoped id.
    ///
    /// # Errors
    ///
    /// Container fault if the payload is malformed or rejected.
    async fn install(&self, source: BundleSource) -> Result<BundleId>;

    /// Moves a bundle to [`BundleState::Active`].
    ///
    /// # Errors
    ///
    /// Container fault if the id is unknown or the bundle cannot start.
    async fn start_bundle(&self, id: BundleId) -> Result<()>;

    /// Returns the bundle's current lifecycle state.
    async fn bundle_state(&self, id: BundleId) -> Result<BundleState>;

    /// Sets a bundle's start level.
    ///
    /// Optional: the default returns [`Error::NotSupported`]. Callers must
    /// tolerate that.
    async fn set_bundle_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        let _ = (id, level);
        Err(Error::NotSupported(format!(
            "set_bundle_start_level not supported by {}",
            self.name()
        )))
    }

    /// Blocks until the bundle reaches `expected` or `timeout` elapses.
    ///
    /// Polls [`bundle_state`](Self::bundle_state) every
    /// [`DEFAULT_POLL_INTERVAL`].
    async fn wait_for_state(
        &self,
        id: BundleId,
        expected: BundleState,
        timeout: Duration,
    ) -> Result<()> {
        let operation = format!("wait for bundle {id} to become {expected} in {}", self.name());
        poll_until(&operation, timeout, DEFAULT_POLL_INTERVAL, move || async move {
            let state = self.bundle_state(id).await?;
            Ok((state == expected).then_some(()))
        })
        .await
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Looks up exactly one service matching `query`, waiting up to `timeout`
    /// for it to appear.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if nothing matching appears in time.
    async fn get_service(&self, query: &ServiceQuery, timeout: Duration)
    -> Result<Arc<dyn Service>>;
}

/// Typed conveniences over [`TestContainer`].
#[async_trait]
pub trait TestContainerExt: TestContainer {
    /// Looks up the service of capability `C`.
    async fn service<C: Capability>(
        &self,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<ServiceHandle<C>> {
        let mut query = ServiceQuery::of::<C>();
        query.filter = filter.map(str::to_string);
        let service = self.get_service(&query, timeout).await?;
        Ok(ServiceHandle::new(service))
    }

    /// Installs and starts a bundle in one step.
    async fn install_and_start(&self, source: BundleSource) -> Result<BundleId> {
        let id = self.install(source).await?;
        self.start_bundle(id).await?;
        Ok(id)
    }
}

impl<T: TestContainer + ?Sized> TestContainerExt for T {}
