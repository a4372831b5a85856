//! # Orchestration Constants
//!
//! Defines timeouts, bounds, and well-known names for the orchestration
//! layer. These constants are the **single source of truth** shared by the
//! container-side bridge and the driver-side stubs, which must agree on them
//! out of band.
//!
//! ## Cross-References
//!
//! - [`crate::container`]: Uses poll interval and start-level bounds
//! - [`crate::bridge`]: Uses binding name, wire bounds and drain timeout
//! - [`crate::containers::remote`]: Uses RPC and startup timeouts
//! - [`crate::config`]: Uses the environment keys

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

// =============================================================================
// Well-Known Names
// =============================================================================

/// Registry name under which every bridge is bound.
///
/// Publisher and consumer must use the same value; it identifies the
/// bridge's remote interface, not a particular container.
pub const BRIDGE_BINDING_NAME: &str = "probekit.bridge.RemoteBundleContext";

/// Environment variable carrying the bridge registry port.
pub const BRIDGE_PORT_ENV: &str = "PROBEKIT_BRIDGE_PORT";

/// Environment variable carrying the bridge listen address.
pub const BRIDGE_HOST_ENV: &str = "PROBEKIT_BRIDGE_HOST";

/// Environment variable carrying the in-flight drain timeout in milliseconds.
pub const BRIDGE_DRAIN_ENV: &str = "PROBEKIT_BRIDGE_DRAIN_MS";

/// Default listen address for the bridge registry.
pub const DEFAULT_BRIDGE_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// =============================================================================
// Timeouts
// =============================================================================
//
// Every blocking operation in this crate is bounded. Waits poll with a fixed
// interval and clamp the final sleep to the remaining budget, so a wait never
// overshoots its deadline by more than one interval.
// =============================================================================

/// Poll interval for `wait_for_state` and service lookups (50 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default timeout for a single bridge round trip (30 seconds).
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a remote container waits for its bridge to appear (60 seconds).
///
/// The container process binds its registry during startup; the driver polls
/// the registry until the binding resolves or this budget is spent.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for service lookups (10 seconds).
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time in-flight bridge calls may drain on shutdown (5 seconds).
///
/// Calls still running after this are aborted.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Wire Bounds
// =============================================================================

/// Maximum length of one request line on the bridge wire (64 MiB).
///
/// Install requests carry base64 bundle bytes, so this bounds the largest
/// bundle a bridge accepts; see [`MAX_BUNDLE_SIZE`].
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024 * 1024;

/// Maximum decoded bundle payload (32 MiB).
pub const MAX_BUNDLE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum concurrent connections accepted by one registry.
pub const MAX_BRIDGE_CONNECTIONS: usize = 64;

/// Maximum bundle location length.
pub const MAX_LOCATION_LEN: usize = 2048;

/// Maximum nesting depth of a service filter expression.
///
/// Filters arrive from the wire and are parsed recursively.
pub const MAX_FILTER_DEPTH: usize = 64;

// =============================================================================
// Lifecycle Bounds
// =============================================================================

/// Lowest valid bundle start level.
pub const MIN_START_LEVEL: u32 = 1;

/// Start level assigned to newly installed bundles.
pub const DEFAULT_BUNDLE_START_LEVEL: u32 = 1;

/// Maximum depth of a test address derivation chain.
pub const MAX_ADDRESS_DEPTH: usize = 32;

/// First bundle id handed out by a composite container.
///
/// Composite ids live far above anything a single backend allocates, so a
/// backend id passed straight to a composite is never mistaken for one.
pub const COMPOSITE_ID_BASE: u64 = 1 << 48;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_fits_in_request_line() {
        // base64 expands by 4/3
        assert!(MAX_BUNDLE_SIZE / 3 * 4 < MAX_REQUEST_LINE_LEN);
    }

    #[test]
    fn test_poll_interval_below_timeouts() {
        assert!(DEFAULT_POLL_INTERVAL < DEFAULT_SERVICE_TIMEOUT);
        assert!(DEFAULT_POLL_INTERVAL < DEFAULT_RPC_TIMEOUT);
    }
}
