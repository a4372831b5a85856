//! In-process bundle runtime.
//!
//! [`Framework`] is the native context a container wraps: a bundle table
//! driven through the lifecycle in [`crate::container`], per-bundle start
//! levels, and a service registry queried with [`crate::filter`]
//! expressions. `LocalTestContainer` drives it directly; the bridge exposes
//! it to other processes.
//!
//! Bundle code is not loaded. Behaviour is attached per location through a
//! [`BundleActivator`], which runs when the bundle starts and typically
//! registers the services the probe publishes.
//!
//! # Locking
//!
//! All state sits behind one `RwLock`. The lock is never held while an
//! activator runs, so activators may call back into the framework.

use crate::constants::{
    DEFAULT_BUNDLE_START_LEVEL, MAX_BUNDLE_SIZE, MAX_LOCATION_LEN, MIN_START_LEVEL,
};
use crate::container::{BundleId, BundleSource, BundleState};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::service::Service;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Leading bytes of a ZIP local file header; every bundle archive has them.
const ARCHIVE_MAGIC: &[u8] = b"PK\x03\x04";

/// Id of the framework's own bundle. Installed bundles start at 1.
pub const SYSTEM_BUNDLE_ID: BundleId = BundleId(0);

/// Property holding the registered type name.
pub const OBJECT_CLASS: &str = "objectClass";

/// Property holding the numeric service id.
pub const SERVICE_ID: &str = "service.id";

/// Property holding the service ranking.
pub const SERVICE_RANKING: &str = "service.ranking";

// =============================================================================
// Activators
// =============================================================================

/// Hook run when a bundle at a given location starts or stops.
pub trait BundleActivator: Send + Sync {
    /// Called while the bundle is `Starting`. An error aborts the start.
    fn start(&self, framework: &Framework, bundle: BundleId) -> Result<()>;

    /// Called while the bundle is `Stopping`.
    fn stop(&self, framework: &Framework, bundle: BundleId) -> Result<()> {
        let _ = (framework, bundle);
        Ok(())
    }
}

// =============================================================================
// Bundle / Service Records
// =============================================================================

/// Snapshot of one installed bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    /// Framework-scoped id.
    pub id: BundleId,
    /// Install location.
    pub location: String,
    /// Lifecycle state.
    pub state: BundleState,
    /// Start level.
    pub start_level: u32,
    /// SHA-256 of the installed archive, if installed from bytes.
    pub digest: Option<String>,
    /// When the bundle was installed.
    pub installed_at: DateTime<Utc>,
}

struct ServiceRegistration {
    id: u64,
    owner: BundleId,
    properties: BTreeMap<String, String>,
    ranking: i64,
    service: Arc<dyn Service>,
}

#[derive(Default)]
struct FrameworkState {
    running: bool,
    next_bundle_id: u64,
    next_service_id: u64,
    bundles: BTreeMap<BundleId, BundleInfo>,
    services: Vec<ServiceRegistration>,
    activators: HashMap<String, Arc<dyn BundleActivator>>,
    properties: BTreeMap<String, String>,
    boot_delegation: Vec<String>,
}

// =============================================================================
// Framework
// =============================================================================

/// In-process bundle runtime.
pub struct Framework {
    name: String,
    state: RwLock<FrameworkState>,
}

impl Framework {
    /// Creates a stopped framework.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(FrameworkState {
                next_bundle_id: 1,
                next_service_id: 1,
                ..FrameworkState::default()
            }),
        }
    }

    /// Framework name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, FrameworkState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FrameworkState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // =========================================================================
    // Framework Lifecycle
    // =========================================================================

    /// Starts the framework.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut state = self.write();
        if state.running {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }
        state.running = true;
        info!(framework = %self.name, "framework started");
        Ok(())
    }

    /// Stops every active bundle (highest start level first) and the framework.
    ///
    /// Activator failures during stop are logged, not returned.
    pub fn stop(&self) -> Result<()> {
        let mut active: Vec<(u32, BundleId)> = self
            .read()
            .bundles
            .values()
            .filter(|b| b.state == BundleState::Active)
            .map(|b| (b.start_level, b.id))
            .collect();
        active.sort_by(|a, b| b.cmp(a));

        for (_, id) in active {
            if let Err(e) = self.stop_bundle(id) {
                warn!(framework = %self.name, bundle = %id, error = %e, "bundle stop failed");
            }
        }
        self.write().running = false;
        info!(framework = %self.name, "framework stopped");
        Ok(())
    }

    /// Returns true while the framework is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.read().running
    }

    /// Drops every bundle, service and property and stops the framework.
    ///
    /// Activators registered with [`register_activator`](Self::register_activator)
    /// survive. Never fails.
    pub fn reset(&self) {
        let mut state = self.write();
        let bundles = state.bundles.len();
        state.running = false;
        state.bundles.clear();
        state.services.clear();
        state.properties.clear();
        state.boot_delegation.clear();
        debug!(framework = %self.name, bundles, "framework reset");
    }

    /// Sets a framework property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().properties.insert(key.into(), value.into());
    }

    /// Reads a framework property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<String> {
        self.read().properties.get(key).cloned()
    }

    /// Adds a boot delegation package.
    pub fn add_boot_delegation(&self, package: impl Into<String>) {
        self.write().boot_delegation.push(package.into());
    }

    /// Boot delegation packages in insertion order.
    #[must_use]
    pub fn boot_delegation(&self) -> Vec<String> {
        self.read().boot_delegation.clone()
    }

    /// Attaches an activator to every bundle installed at `location`.
    pub fn register_activator(&self, location: impl Into<String>, activator: Arc<dyn BundleActivator>) {
        self.write().activators.insert(location.into(), activator);
    }

    // =========================================================================
    // Bundles
    // =========================================================================

    /// Installs a bundle.
    ///
    /// Installing a location that is already installed returns the existing
    /// id. Byte payloads must be bundle archives (ZIP).
    ///
    /// # Errors
    ///
    /// [`Error::InstallFailed`] for a bad location or malformed payload.
    pub fn install(&self, source: &BundleSource) -> Result<BundleId> {
        let location = source.location_str();
        validate_location(location)?;

        let digest = match source {
            BundleSource::Location(_) => None,
            BundleSource::Bytes { content, .. } => Some(validate_archive(location, content)?),
        };

        let mut state = self.write();
        if let Some(existing) = state
            .bundles
            .values()
            .find(|b| b.location == location && b.state != BundleState::Uninstalled)
        {
            debug!(framework = %self.name, bundle = %existing.id, location, "location already installed");
            return Ok(existing.id);
        }

        let id = BundleId(state.next_bundle_id);
        state.next_bundle_id += 1;
        state.bundles.insert(
            id,
            BundleInfo {
                id,
                location: location.to_string(),
                state: BundleState::Installed,
                start_level: DEFAULT_BUNDLE_START_LEVEL,
                digest,
                installed_at: Utc::now(),
            },
        );
        info!(framework = %self.name, bundle = %id, location, "bundle installed");
        Ok(id)
    }

    /// Resolves and starts a bundle, running its activator.
    ///
    /// Starting an active bundle is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::BundleNotFound`] for an unknown id, [`Error::StartFailed`] if
    /// the framework is stopped or the activator fails, [`Error::InvalidState`]
    /// for an uninstalled or transitioning bundle.
    pub fn start_bundle(&self, id: BundleId) -> Result<()> {
        let activator = {
            let mut state = self.write();
            if !state.running {
                return Err(Error::StartFailed {
                    id: id.value(),
                    reason: format!("framework '{}' is not running", self.name),
                });
            }
            let info = bundle_mut(&mut state, id)?;
            if info.state == BundleState::Active {
                return Ok(());
            }
            if info.state == BundleState::Installed {
                transition(info, BundleState::Resolved)?;
            }
            transition(info, BundleState::Starting)?;
            let location = info.location.clone();
            state.activators.get(&location).cloned()
        };

        if let Some(activator) = activator {
            if let Err(e) = activator.start(self, id) {
                let mut state = self.write();
                state.services.retain(|s| s.owner != id);
                if let Ok(info) = bundle_mut(&mut state, id) {
                    info.state = BundleState::Resolved;
                }
                warn!(framework = %self.name, bundle = %id, error = %e, "activator failed");
                return Err(Error::StartFailed {
                    id: id.value(),
                    reason: e.to_string(),
                });
            }
        }

        let mut state = self.write();
        let info = bundle_mut(&mut state, id)?;
        transition(info, BundleState::Active)?;
        info!(framework = %self.name, bundle = %id, "bundle active");
        Ok(())
    }

    /// Stops an active bundle and unregisters its services.
    ///
    /// # Errors
    ///
    /// [`Error::BundleNotFound`] or [`Error::InvalidState`].
    pub fn stop_bundle(&self, id: BundleId) -> Result<()> {
        let activator = {
            let mut state = self.write();
            let info = bundle_mut(&mut state, id)?;
            transition(info, BundleState::Stopping)?;
            let location = info.location.clone();
            state.activators.get(&location).cloned()
        };

        if let Some(activator) = activator {
            if let Err(e) = activator.stop(self, id) {
                warn!(framework = %self.name, bundle = %id, error = %e, "activator stop failed");
            }
        }

        let mut state = self.write();
        state.services.retain(|s| s.owner != id);
        let info = bundle_mut(&mut state, id)?;
        transition(info, BundleState::Resolved)?;
        debug!(framework = %self.name, bundle = %id, "bundle stopped");
        Ok(())
    }

    /// Uninstalls a bundle from any state.
    ///
    /// # Errors
    ///
    /// [`Error::BundleNotFound`] or [`Error::InvalidState`] if already
    /// uninstalled.
    pub fn uninstall(&self, id: BundleId) -> Result<()> {
        let mut state = self.write();
        state.services.retain(|s| s.owner != id);
        let info = bundle_mut(&mut state, id)?;
        transition(info, BundleState::Uninstalled)?;
        info!(framework = %self.name, bundle = %id, "bundle uninstalled");
        Ok(())
    }

    /// Current state of a bundle.
    ///
    /// # Errors
    ///
    /// [`Error::BundleNotFound`] for an unknown id.
    pub fn bundle_state(&self, id: BundleId) -> Result<BundleState> {
        self.bundle(id).map(|b| b.state)
    }

    /// Snapshot of a bundle.
    ///
    /// # Errors
    ///
    /// [`Error::BundleNotFound`] for an unknown id.
    pub fn bundle(&self, id: BundleId) -> Result<BundleInfo> {
        self.read()
            .bundles
            .get(&id)
            .cloned()
            .ok_or(Error::BundleNotFound(id.value()))
    }

    /// Snapshots of every bundle, ordered by id.
    #[must_use]
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.read().bundles.values().cloned().collect()
    }

    /// Sets a bundle's start level.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStartLevel`] below [`MIN_START_LEVEL`],
    /// [`Error::BundleNotFound`] for an unknown id.
    pub fn set_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        if level < MIN_START_LEVEL {
            return Err(Error::InvalidStartLevel {
                id: id.value(),
                level,
            });
        }
        let mut state = self.write();
        let info = bundle_mut(&mut state, id)?;
        info.start_level = level;
        debug!(framework = %self.name, bundle = %id, level, "start level set");
        Ok(())
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Registers a service on behalf of `owner`.
    ///
    /// `objectClass` and `service.id` are added to `properties`. Returns the
    /// service id.
    pub fn register_service(
        &self,
        owner: BundleId,
        type_name: &str,
        mut properties: BTreeMap<String, String>,
        service: Arc<dyn Service>,
    ) -> u64 {
        let mut state = self.write();
        let id = state.next_service_id;
        state.next_service_id += 1;
        properties.insert(OBJECT_CLASS.to_string(), type_name.to_string());
        properties.insert(SERVICE_ID.to_string(), id.to_string());
        let ranking = properties
            .get(SERVICE_RANKING)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0);
        state.services.push(ServiceRegistration {
            id,
            owner,
            properties,
            ranking,
            service,
        });
        debug!(framework = %self.name, service = id, type_name, "service registered");
        id
    }

    /// Removes a service registration. Returns false if it was not registered.
    pub fn unregister_service(&self, service_id: u64) -> bool {
        let mut state = self.write();
        let before = state.services.len();
        state.services.retain(|s| s.id != service_id);
        state.services.len() != before
    }

    /// Finds the best service of `type_name` matching `filter`.
    ///
    /// Highest `service.ranking` wins; ties go to the lowest service id.
    #[must_use]
    pub fn find_service(&self, type_name: &str, filter: Option<&Filter>) -> Option<Arc<dyn Service>> {
        let state = self.read();
        state
            .services
            .iter()
            .filter(|s| s.properties.get(OBJECT_CLASS).map(String::as_str) == Some(type_name))
            .filter(|s| filter.is_none_or(|f| f.matches(&s.properties)))
            .max_by(|a, b| a.ranking.cmp(&b.ranking).then(b.id.cmp(&a.id)))
            .map(|s| Arc::clone(&s.service))
    }

    /// Number of registered services.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.read().services.len()
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Framework")
            .field("name", &self.name)
            .field("running", &state.running)
            .field("bundles", &state.bundles.len())
            .field("services", &state.services.len())
            .finish()
    }
}

fn bundle_mut(state: &mut FrameworkState, id: BundleId) -> Result<&mut BundleInfo> {
    state
        .bundles
        .get_mut(&id)
        .ok_or(Error::BundleNotFound(id.value()))
}

fn transition(info: &mut BundleInfo, target: BundleState) -> Result<()> {
    if !info.state.can_transition_to(target) {
        return Err(Error::InvalidState {
            id: info.id.value(),
            state: info.state.to_string(),
            target: target.to_string(),
        });
    }
    info.state = target;
    Ok(())
}

fn validate_location(location: &str) -> Result<()> {
    let reject = |reason: &str| Error::InstallFailed {
        location: location.to_string(),
        reason: reason.to_string(),
    };
    if location.trim().is_empty() {
        return Err(reject("location is empty"));
    }
    if location.len() > MAX_LOCATION_LEN {
        return Err(reject(&format!("location exceeds {MAX_LOCATION_LEN} bytes")));
    }
    if location.chars().any(char::is_control) {
        return Err(reject("location contains control characters"));
    }
    Ok(())
}

/// Checks a bundle archive and returns its SHA-256 digest.
fn validate_archive(location: &str, content: &[u8]) -> Result<String> {
    use sha2::{Digest, Sha256};

    if content.len() > MAX_BUNDLE_SIZE {
        return Err(Error::InstallFailed {
            location: location.to_string(),
            reason: format!("bundle exceeds {MAX_BUNDLE_SIZE} bytes"),
        });
    }
    if !content.starts_with(ARCHIVE_MAGIC) {
        return Err(Error::InstallFailed {
            location: location.to_string(),
            reason: "payload is not a bundle archive".to_string(),
        });
    }
    let digest = Sha256::digest(content);
    Ok(format!("sha256:{}", hex(&digest)))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
