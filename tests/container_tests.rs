//! Tests for the local test container and the in-process framework.
//!
//! Covers the bundle lifecycle, bounded waits, service lookup and option
//! handling.

use async_trait::async_trait;
use probekit::container::poll_until;
use probekit::framework::{BundleActivator, SERVICE_RANKING};
use probekit::service::decode_args;
use probekit::{
    BundleId, BundleSource, BundleState, Capability, ContainerOption, Error, ErrorKind, Framework, LocalTestContainer,
    Method, Service, ServiceQuery, TestContainer, TestContainerExt,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ZIP: &[u8] = b"PK\x03\x04probe-bundle";

// =============================================================================
// Fixtures
// =============================================================================

struct Echo;

impl Capability for Echo {
    const TYPE_NAME: &'static str = "probe.Echo";
    const METHODS: &'static [&'static str] = &["echo", "label"];
}

impl Echo {
    const ECHO: Method<Self, (String,), String> = Method::new("echo");
    const LABEL: Method<Self, (), String> = Method::new("label");
}

struct EchoService {
    label: String,
}

#[async_trait]
impl Service for EchoService {
    fn type_name(&self) -> &str {
        Echo::TYPE_NAME
    }

    async fn invoke(&self, method: &str, args: Value) -> probekit::Result<Value> {
        match method {
            "echo" => {
                let (text,): (String,) = decode_args(Echo::TYPE_NAME, method, args)?;
                Ok(json!(text))
            }
            "label" => Ok(json!(self.label)),
            other => Err(Error::UnknownMethod {
                service: Echo::TYPE_NAME.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// Registers an echo service when its bundle starts.
struct EchoActivator {
    label: String,
}

impl BundleActivator for EchoActivator {
    fn start(&self, framework: &Framework, bundle: BundleId) -> probekit::Result<()> {
        framework.register_service(
            bundle,
            Echo::TYPE_NAME,
            BTreeMap::new(),
            Arc::new(EchoService {
                label: self.label.clone(),
            }),
        );
        Ok(())
    }
}

struct FailingActivator;

impl BundleActivator for FailingActivator {
    fn start(&self, _framework: &Framework, _bundle: BundleId) -> probekit::Result<()> {
        Err(Error::NotSupported("activator refuses to start".to_string()))
    }
}

async fn started(name: &str) -> LocalTestContainer {
    let container = LocalTestContainer::new(name);
    container.start().await.unwrap();
    container
}

// =============================================================================
// Bundle Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_install_start_reaches_active() {
    let container = started("local").await;

    let id = container.install(BundleSource::location("file:probe.jar")).await.unwrap();
    assert_eq!(container.bundle_state(id).await.unwrap(), BundleState::Installed);

    container.start_bundle(id).await.unwrap();
    assert_eq!(container.bundle_state(id).await.unwrap(), BundleState::Active);

    container
        .wait_for_state(id, BundleState::Active, Duration::from_millis(100))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_install_same_location_returns_existing_id() {
    let container = started("local").await;
    let first = container.install(BundleSource::location("file:probe.jar")).await.unwrap();
    let second = container.install(BundleSource::location("file:probe.jar")).await.unwrap();
    assert_eq!(first, second);
    assert_ne!(first, probekit::framework::SYSTEM_BUNDLE_ID);
}

#[tokio::test]
async fn test_install_bytes_records_digest() {
    let container = started("local").await;
    let id = container
        .install(BundleSource::bytes("inline:probe", ZIP.to_vec()))
        .await
        .unwrap();

    let info = container.framework().bundle(id).unwrap();
    assert_eq!(info.location, "inline:probe");
    assert!(info.digest.unwrap().starts_with("sha256:"));
}

#[tokio::test]
async fn test_install_malformed_payload_is_container_fault() {
    let container = started("local").await;
    let err = container
        .install(BundleSource::bytes("inline:junk", b"not a bundle".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstallFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Container);

    let err = container.install(BundleSource::location("  ")).await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed { .. }));
}

#[tokio::test]
async fn test_start_unknown_bundle_is_container_fault() {
    let container = started("local").await;
    let err = container.start_bundle(BundleId(404)).await.unwrap_err();
    assert!(matches!(err, Error::BundleNotFound(404)));
    assert_eq!(err.kind(), ErrorKind::Container);
}

#[tokio::test]
async fn test_start_requires_running_framework() {
    let container = LocalTestContainer::new("cold");
    let id = container.install(BundleSource::location("file:probe.jar")).await.unwrap();
    let err = container.start_bundle(id).await.unwrap_err();
    assert!(matches!(err, Error::StartFailed { .. }));
}

#[tokio::test]
async fn test_failing_activator_leaves_bundle_resolved() {
    let container = started("local").await;
    container
        .framework()
        .register_activator("file:broken.jar", Arc::new(FailingActivator));

    let id = container.install(BundleSource::location("file:broken.jar")).await.unwrap();
    let err = container.start_bundle(id).await.unwrap_err();

    assert!(matches!(err, Error::StartFailed { .. }));
    assert!(err.to_string().contains("activator refuses to start"));
    assert_eq!(container.bundle_state(id).await.unwrap(), BundleState::Resolved);
}

#[tokio::test]
async fn test_start_level() {
    let container = started("local").await;
    let id = container.install(BundleSource::location("file:probe.jar")).await.unwrap();

    container.set_bundle_start_level(id, 5).await.unwrap();
    assert_eq!(container.framework().bundle(id).unwrap().start_level, 5);

    let err = container.set_bundle_start_level(id, 0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStartLevel { level: 0, .. }));
}

#[tokio::test]
async fn test_uninstall_is_terminal() {
    let container = started("local").await;
    let framework = container.framework();
    let id = container.install_and_start(BundleSource::location("file:probe.jar")).await.unwrap();

    framework.uninstall(id).unwrap();
    assert_eq!(framework.bundle_state(id).unwrap(), BundleState::Uninstalled);

    let err = framework.uninstall(id).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn test_stop_deactivates_bundles_and_services() {
    let container = started("local").await;
    let framework = container.framework();
    framework.register_activator(
        "file:echo.jar",
        Arc::new(EchoActivator {
            label: "local".to_string(),
        }),
    );
    let id = container.install_and_start(BundleSource::location("file:echo.jar")).await.unwrap();
    assert_eq!(framework.service_count(), 1);

    container.stop().await.unwrap();
    assert!(!framework.is_running());
    assert_eq!(framework.bundle_state(id).unwrap(), BundleState::Resolved);
    assert_eq!(framework.service_count(), 0);
}

// =============================================================================
// Bounded Wait Tests
// =============================================================================

#[tokio::test]
async fn test_wait_for_state_times_out_within_bound() {
    let container = started("local").await;
    let id = container.install(BundleSource::location("file:never.jar")).await.unwrap();

    let timeout = Duration::from_millis(500);
    let began = Instant::now();
    let err = container
        .wait_for_state(id, BundleState::Active, timeout)
        .await
        .unwrap_err();
    let elapsed = began.elapsed();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed < timeout + Duration::from_millis(250),
        "overshot deadline: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_wait_for_state_unknown_bundle_fails_fast() {
    let container = started("local").await;
    let began = Instant::now();
    let err = container
        .wait_for_state(BundleId(99), BundleState::Active, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BundleNotFound(99)));
    assert!(began.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_poll_until_returns_value() {
    let mut calls = 0;
    let value = poll_until("count", Duration::from_secs(1), Duration::from_millis(5), || {
        calls += 1;
        let ready = calls >= 3;
        async move { Ok(ready.then_some(calls)) }
    })
    .await
    .unwrap();
    assert_eq!(value, 3);
}

// =============================================================================
// Service Tests
// =============================================================================

#[tokio::test]
async fn test_typed_service_call() {
    let container = started("local").await;
    container.framework().register_activator(
        "file:echo.jar",
        Arc::new(EchoActivator {
            label: "local".to_string(),
        }),
    );
    container.install_and_start(BundleSource::location("file:echo.jar")).await.unwrap();

    let echo = container.service::<Echo>(None, Duration::from_secs(1)).await.unwrap();
    let reply = echo.call(Echo::ECHO, ("hello".to_string(),)).await.unwrap();
    assert_eq!(reply, "hello");
    assert_eq!(echo.call(Echo::LABEL, ()).await.unwrap(), "local");
}

#[tokio::test]
async fn test_service_lookup_times_out() {
    let container = started("local").await;
    let began = Instant::now();
    let err = container
        .get_service(&ServiceQuery::new("probe.Missing"), Duration::from_millis(200))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(began.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_invalid_filter_rejected_immediately() {
    let container = started("local").await;
    let query = ServiceQuery::new("probe.Echo").with_filter("(unclosed=");
    let err = container.get_service(&query, Duration::from_secs(5)).await.err().unwrap();
    assert!(matches!(err, Error::InvalidFilter { .. }));
}

#[tokio::test]
async fn test_service_filter_and_ranking() {
    let framework = Framework::new("ranked");
    let make = |label: &str| -> Arc<dyn Service> {
        Arc::new(EchoService {
            label: label.to_string(),
        })
    };

    let mut low = BTreeMap::new();
    low.insert("vendor".to_string(), "acme".to_string());
    framework.register_service(BundleId(0), Echo::TYPE_NAME, low, make("low"));

    let mut high = BTreeMap::new();
    high.insert("vendor".to_string(), "globex".to_string());
    high.insert(SERVICE_RANKING.to_string(), "10".to_string());
    framework.register_service(BundleId(0), Echo::TYPE_NAME, high, make("high"));

    let best = framework.find_service(Echo::TYPE_NAME, None).unwrap();
    assert_eq!(best.invoke("label", Value::Null).await.unwrap(), json!("high"));

    let filter = probekit::Filter::parse("(vendor=acme)").unwrap();
    let acme = framework.find_service(Echo::TYPE_NAME, Some(&filter)).unwrap();
    assert_eq!(acme.invoke("label", Value::Null).await.unwrap(), json!("low"));

    let filter = probekit::Filter::parse("(objectClass=probe.Other)").unwrap();
    assert!(framework.find_service(Echo::TYPE_NAME, Some(&filter)).is_none());
}

// =============================================================================
// Option Tests
// =============================================================================

#[tokio::test]
async fn test_options_applied_on_start() {
    let options = vec![
        ContainerOption::boot_delegation("sun.*"),
        ContainerOption::system_property("probe.mode", "fast"),
        ContainerOption::provision("file:provisioned.jar"),
        ContainerOption::custom("vendor-flag"),
    ];
    let container = LocalTestContainer::new("opts").with_options(options);

    let description = container.option_description();
    assert_eq!(description.used.len(), 3);
    assert!(description.ignored.contains(&ContainerOption::custom("vendor-flag")));

    container.start().await.unwrap();
    let framework = container.framework();
    assert_eq!(framework.property("probe.mode").as_deref(), Some("fast"));
    assert_eq!(framework.boot_delegation(), vec!["sun.*".to_string()]);

    let bundles = framework.bundles();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].location, "file:provisioned.jar");
    assert_eq!(bundles[0].state, BundleState::Active);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let container = started("local").await;
    container.install_and_start(BundleSource::location("file:probe.jar")).await.unwrap();

    container.cleanup().await.unwrap();
    container.cleanup().await.unwrap();
    assert!(container.framework().bundles().is_empty());
    assert!(!container.framework().is_running());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let container = started("local").await;
    let err = container.start().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyStarted(_)));
}
