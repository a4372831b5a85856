//! Tests for the composite test container.
//!
//! Uses scripted targets that record every call so fan-out order,
//! fail-fast behaviour and id translation can be observed directly.

use async_trait::async_trait;
use probekit::{
    BundleId, BundleSource, BundleState, Capability, CompositeTestContainer, ContainerOption, Error, ErrorKind,
    LocalTestContainer, Method, OptionDescription, Service, ServiceQuery, TestContainer, COMPOSITE_ID_BASE,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ZIP: &[u8] = b"PK\x03\x04probe-bundle";

// =============================================================================
// Scripted Target
// =============================================================================

type CallLog = Arc<Mutex<Vec<String>>>;

struct ScriptedTarget {
    name: String,
    log: CallLog,
    fail_on: Option<&'static str>,
    next_bundle: u64,
    state: BundleState,
    options: OptionDescription,
}

impl ScriptedTarget {
    fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_on: None,
            next_bundle: 1,
            state: BundleState::Active,
            options: OptionDescription::default(),
        }
    }

    fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    fn issuing_ids_from(mut self, first: u64) -> Self {
        self.next_bundle = first;
        self
    }

    fn in_state(mut self, state: BundleState) -> Self {
        self.state = state;
        self
    }

    fn with_options(mut self, options: OptionDescription) -> Self {
        self.options = options;
        self
    }

    fn record(&self, call: String) -> probekit::Result<()> {
        let operation = call.split(':').next().unwrap_or_default().to_string();
        self.log.lock().unwrap().push(format!("{}:{call}", self.name));
        if self.fail_on == Some(operation.as_str()) {
            return Err(Error::NotSupported(format!("{} refuses {operation}", self.name)));
        }
        Ok(())
    }
}

struct NameService {
    name: String,
}

#[async_trait]
impl Service for NameService {
    fn type_name(&self) -> &str {
        Whoami::TYPE_NAME
    }

    async fn invoke(&self, method: &str, args: Value) -> probekit::Result<Value> {
        Ok(json!({ "target": self.name, "method": method, "args": args }))
    }
}

#[async_trait]
impl TestContainer for ScriptedTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn option_description(&self) -> OptionDescription {
        self.options.clone()
    }

    async fn start(&self) -> probekit::Result<()> {
        self.record("start".to_string())
    }

    async fn stop(&self) -> probekit::Result<()> {
        self.record("stop".to_string())
    }

    async fn cleanup(&self) -> probekit::Result<()> {
        self.record("cleanup".to_string())
    }

    async fn install(&self, source: BundleSource) -> probekit::Result<BundleId> {
        self.record(format!("install:{}", source.location_str()))?;
        Ok(BundleId(self.next_bundle))
    }

    async fn start_bundle(&self, id: BundleId) -> probekit::Result<()> {
        self.record(format!("start_bundle:{id}"))
    }

    async fn bundle_state(&self, id: BundleId) -> probekit::Result<BundleState> {
        self.record(format!("bundle_state:{id}"))?;
        Ok(self.state)
    }

    async fn set_bundle_start_level(&self, id: BundleId, level: u32) -> probekit::Result<()> {
        self.record(format!("set_bundle_start_level:{id}:{level}"))
    }

    async fn get_service(&self, query: &ServiceQuery, _timeout: Duration) -> probekit::Result<Arc<dyn Service>> {
        self.record(format!("get_service:{}", query.type_name))?;
        Ok(Arc::new(NameService {
            name: self.name.clone(),
        }))
    }
}

struct Whoami;

impl Capability for Whoami {
    const TYPE_NAME: &'static str = "probe.Whoami";
    const METHODS: &'static [&'static str] = &["whoami"];
}

impl Whoami {
    const WHOAMI: Method<Self, (u32,), Value> = Method::new("whoami");
}

fn composite(targets: Vec<ScriptedTarget>) -> CompositeTestContainer {
    let targets = targets
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn TestContainer>)
        .collect();
    CompositeTestContainer::new("composite", targets)
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

// =============================================================================
// Fail-Fast Tests
// =============================================================================

#[tokio::test]
async fn test_fail_fast_reports_index_and_skips_later_targets() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log),
        ScriptedTarget::new("t1", &log).failing_on("start_bundle"),
        ScriptedTarget::new("t2", &log),
    ]);

    let err = composite.start_bundle(BundleId(5)).await.unwrap_err();

    match &err {
        Error::Composite {
            index,
            operation,
            source,
        } => {
            assert_eq!(*index, 1);
            assert_eq!(operation, "start_bundle");
            assert!(matches!(**source, Error::NotSupported(_)));
        }
        other => panic!("expected composite fault, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Composite);
    assert_eq!(calls(&log), vec!["t0:start_bundle:5", "t1:start_bundle:5"]);
}

#[tokio::test]
async fn test_fail_fast_on_start_and_set_start_level() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).failing_on("start"),
        ScriptedTarget::new("t1", &log),
    ]);
    let err = composite.start().await.unwrap_err();
    assert!(matches!(err, Error::Composite { index: 0, .. }));
    assert_eq!(calls(&log), vec!["t0:start"]);

    let log = CallLog::default();
    let composite = composite_with_levels(&log);
    let err = composite.set_bundle_start_level(BundleId(3), 4).await.unwrap_err();
    assert!(matches!(err, Error::Composite { index: 1, .. }));
    assert_eq!(
        calls(&log),
        vec!["t0:set_bundle_start_level:3:4", "t1:set_bundle_start_level:3:4"]
    );
}

#[tokio::test]
async fn test_start_fault_on_second_of_three_targets() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log),
        ScriptedTarget::new("t1", &log).failing_on("start"),
        ScriptedTarget::new("t2", &log),
    ]);

    let err = composite.start().await.unwrap_err();
    assert!(matches!(err, Error::Composite { index: 1, ref operation, .. } if operation == "start"));
    assert_eq!(calls(&log), vec!["t0:start", "t1:start"]);
}

fn composite_with_levels(log: &CallLog) -> CompositeTestContainer {
    composite(vec![
        ScriptedTarget::new("t0", log),
        ScriptedTarget::new("t1", log).failing_on("set_bundle_start_level"),
        ScriptedTarget::new("t2", log),
    ])
}

// =============================================================================
// Bundle Id Tests
// =============================================================================

#[tokio::test]
async fn test_install_returns_composite_id_mapping_per_target() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).issuing_ids_from(10),
        ScriptedTarget::new("t1", &log).issuing_ids_from(20),
    ]);

    let id = composite.install(BundleSource::location("file:probe.jar")).await.unwrap();
    assert!(id.value() >= COMPOSITE_ID_BASE);
    assert_eq!(
        composite.target_bundle_ids(id),
        Some(vec![BundleId(10), BundleId(20)])
    );

    composite.start_bundle(id).await.unwrap();
    let log = calls(&log);
    assert!(log.contains(&"t0:start_bundle:10".to_string()));
    assert!(log.contains(&"t1:start_bundle:20".to_string()));
}

#[tokio::test]
async fn test_unknown_id_passed_unchanged_to_every_target() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("t0", &log), ScriptedTarget::new("t1", &log)]);

    composite.start_bundle(BundleId(7)).await.unwrap();
    assert_eq!(calls(&log), vec!["t0:start_bundle:7", "t1:start_bundle:7"]);
    assert!(composite.target_bundle_ids(BundleId(7)).is_none());
}

#[tokio::test]
async fn test_successive_installs_get_distinct_ids() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("t0", &log)]);
    let a = composite.install(BundleSource::location("file:a.jar")).await.unwrap();
    let b = composite.install(BundleSource::location("file:b.jar")).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_install_on_empty_composite_not_supported() {
    let composite = CompositeTestContainer::new("empty", Vec::new());
    let err = composite.install(BundleSource::location("file:a.jar")).await.unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[tokio::test]
async fn test_multiplexed_on_empty_composite_not_supported() {
    let composite = CompositeTestContainer::new("empty", Vec::new());
    let err = composite
        .get_multiplexed::<Whoami>(None, Duration::from_millis(10))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[tokio::test]
async fn test_bundle_state_is_least_advanced() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).in_state(BundleState::Active),
        ScriptedTarget::new("t1", &log).in_state(BundleState::Resolved),
        ScriptedTarget::new("t2", &log).in_state(BundleState::Starting),
    ]);
    assert_eq!(composite.bundle_state(BundleId(1)).await.unwrap(), BundleState::Resolved);
}

// =============================================================================
// Service Broadcast Tests
// =============================================================================

#[tokio::test]
async fn test_broadcast_collects_results_in_target_order() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("r1", &log), ScriptedTarget::new("r2", &log)]);

    let service = composite
        .get_service(&ServiceQuery::of::<Whoami>(), Duration::from_secs(1))
        .await
        .unwrap();
    let result = service.invoke("whoami", json!([42])).await.unwrap();

    let targets: Vec<&str> = result
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["target"].as_str().unwrap())
        .collect();
    assert_eq!(targets, vec!["r1", "r2"]);
    assert_eq!(result[1]["args"], json!([42]));
}

#[tokio::test]
async fn test_multiplexed_typed_call() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("r1", &log), ScriptedTarget::new("r2", &log)]);

    let whoami = composite
        .get_multiplexed::<Whoami>(None, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(whoami.len(), 2);

    let results = whoami.call(Whoami::WHOAMI, (7,)).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["target"], "r1");
    assert_eq!(results[1]["target"], "r2");
}

#[tokio::test]
async fn test_broadcast_rejects_undeclared_method() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("r1", &log)]);
    let service = composite
        .get_service(&ServiceQuery::of::<Whoami>(), Duration::from_secs(1))
        .await
        .unwrap();

    let err = service.invoke("shutdown", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::UnknownMethod { .. }));
}

#[tokio::test]
async fn test_get_service_fail_fast() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).failing_on("get_service"),
        ScriptedTarget::new("t1", &log),
    ]);
    let err = composite
        .get_service(&ServiceQuery::of::<Whoami>(), Duration::from_secs(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Composite { index: 0, .. }));
    assert_eq!(calls(&log), vec!["t0:get_service:probe.Whoami"]);
}

// =============================================================================
// Option Union Tests
// =============================================================================

#[tokio::test]
async fn test_option_description_union() {
    let a = ContainerOption::custom("A");
    let b = ContainerOption::custom("B");
    let c = ContainerOption::custom("C");

    let first = OptionDescription {
        used: BTreeSet::from([a.clone()]),
        ignored: BTreeSet::from([b.clone()]),
    };
    let second = OptionDescription {
        used: BTreeSet::from([b.clone()]),
        ignored: BTreeSet::from([c.clone()]),
    };

    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).with_options(first),
        ScriptedTarget::new("t1", &log).with_options(second),
    ]);

    let description = composite.option_description();
    assert_eq!(description.used, BTreeSet::from([a, b]));
    assert_eq!(description.ignored, BTreeSet::from([c]));
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[tokio::test]
async fn test_cleanup_is_best_effort() {
    let log = CallLog::default();
    let composite = composite(vec![
        ScriptedTarget::new("t0", &log).failing_on("cleanup"),
        ScriptedTarget::new("t1", &log),
        ScriptedTarget::new("t2", &log).failing_on("cleanup"),
    ]);

    let err = composite.cleanup().await.unwrap_err();
    assert_eq!(calls(&log), vec!["t0:cleanup", "t1:cleanup", "t2:cleanup"]);

    match err {
        Error::CleanupFailed { failures } => {
            let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
            assert_eq!(indices, vec![0, 2]);
        }
        other => panic!("expected cleanup failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cleanup_forgets_composite_ids() {
    let log = CallLog::default();
    let composite = composite(vec![ScriptedTarget::new("t0", &log)]);
    let id = composite.install(BundleSource::location("file:a.jar")).await.unwrap();
    composite.cleanup().await.unwrap();
    assert!(composite.target_bundle_ids(id).is_none());
}

// =============================================================================
// Local Target Tests
// =============================================================================

#[tokio::test]
async fn test_composite_over_local_containers() {
    let composite = CompositeTestContainer::new(
        "locals",
        vec![
            Arc::new(LocalTestContainer::new("felix")) as Arc<dyn TestContainer>,
            Arc::new(LocalTestContainer::new("equinox")),
        ],
    );

    composite.start().await.unwrap();
    let id = composite
        .install(BundleSource::bytes("inline:probe", ZIP.to_vec()))
        .await
        .unwrap();
    assert_eq!(composite.bundle_state(id).await.unwrap(), BundleState::Installed);

    composite.start_bundle(id).await.unwrap();
    composite
        .wait_for_state(id, BundleState::Active, Duration::from_secs(1))
        .await
        .unwrap();

    composite.stop().await.unwrap();
    composite.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_composite_wait_shares_one_deadline() {
    let composite = CompositeTestContainer::new(
        "locals",
        vec![
            Arc::new(LocalTestContainer::new("a")) as Arc<dyn TestContainer>,
            Arc::new(LocalTestContainer::new("b")),
        ],
    );
    composite.start().await.unwrap();
    let id = composite.install(BundleSource::location("file:idle.jar")).await.unwrap();

    let timeout = Duration::from_millis(300);
    let began = Instant::now();
    let err = composite
        .wait_for_state(id, BundleState::Active, timeout)
        .await
        .unwrap_err();
    let elapsed = began.elapsed();

    match err {
        Error::Composite { index, source, .. } => {
            assert_eq!(index, 0);
            assert_eq!(source.kind(), ErrorKind::Timeout);
        }
        other => panic!("expected composite timeout, got {other:?}"),
    }
    assert!(elapsed < timeout + Duration::from_millis(250), "overshot: {elapsed:?}");
}
