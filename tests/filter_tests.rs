//! Tests for service filter expressions.

use probekit::{Error, Filter, MAX_FILTER_DEPTH};
use std::collections::BTreeMap;

fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_equality() {
    let f = Filter::parse("(type=default)").unwrap();
    assert!(f.matches(&props(&[("type", "default")])));
    assert!(!f.matches(&props(&[("type", "other")])));
    assert!(!f.matches(&props(&[])));
}

#[test]
fn test_keys_case_insensitive() {
    let f = Filter::parse("(OBJECTCLASS=probe.Echo)").unwrap();
    assert!(f.matches(&props(&[("objectClass", "probe.Echo")])));
}

#[test]
fn test_composites() {
    let f: Filter = "(&(objectClass=probe.Echo)(|(vendor=acme)(vendor=globex))(!(debug=*)))"
        .parse()
        .unwrap();
    assert!(f.matches(&props(&[("objectClass", "probe.Echo"), ("vendor", "globex")])));
    assert!(!f.matches(&props(&[
        ("objectClass", "probe.Echo"),
        ("vendor", "acme"),
        ("debug", "true"),
    ])));
    assert!(!f.matches(&props(&[("objectClass", "probe.Echo"), ("vendor", "initech")])));
}

#[test]
fn test_ordering_numeric_when_possible() {
    let f = Filter::parse("(service.ranking>=10)").unwrap();
    assert!(f.matches(&props(&[("service.ranking", "10")])));
    assert!(f.matches(&props(&[("service.ranking", "100")])));
    assert!(!f.matches(&props(&[("service.ranking", "9")])));

    let f = Filter::parse("(name<=m)").unwrap();
    assert!(f.matches(&props(&[("name", "alpha")])));
    assert!(!f.matches(&props(&[("name", "zulu")])));
}

#[test]
fn test_approx_ignores_case() {
    let f = Filter::parse("(mode~=FAST)").unwrap();
    assert!(f.matches(&props(&[("mode", "fast")])));
}

#[test]
fn test_substring_positions() {
    let f = Filter::parse("(location=*probe*.jar)").unwrap();
    assert!(f.matches(&props(&[("location", "file:/tmp/probe-1.jar")])));
    assert!(!f.matches(&props(&[("location", "file:/tmp/probe-1.zip")])));
}

#[test]
fn test_whitespace_tolerated() {
    let f = Filter::parse("  ( & (a=1) (b=2) )  ").unwrap();
    assert!(f.matches(&props(&[("a", "1"), ("b", "2")])));
}

#[test]
fn test_malformed_filters() {
    for input in ["", "type=default", "(type=default", "(=x)", "(&)", "(a=1))", "(a>1)", "(a>=1*)"] {
        let err = Filter::parse(input).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }), "accepted {input:?}");
    }
}

fn nested_not(depth: usize) -> String {
    format!("{}(a=1){}", "(!".repeat(depth - 1), ")".repeat(depth - 1))
}

#[test]
fn test_nesting_at_limit_accepted() {
    let f = Filter::parse(&nested_not(MAX_FILTER_DEPTH)).unwrap();
    let negations = MAX_FILTER_DEPTH - 1;
    assert_eq!(f.matches(&props(&[("a", "1")])), negations % 2 == 0);
}

#[test]
fn test_deep_nesting_rejected() {
    let err = Filter::parse(&nested_not(MAX_FILTER_DEPTH + 1)).unwrap_err();
    assert!(matches!(err, Error::InvalidFilter { .. }));

    let hostile = format!("{}(a=1){}", "(!".repeat(200_000), ")".repeat(200_000));
    let err = Filter::parse(&hostile).unwrap_err();
    assert!(matches!(err, Error::InvalidFilter { .. }));

    let wide = format!("(&{}(a=1){})", "(|".repeat(MAX_FILTER_DEPTH), ")".repeat(MAX_FILTER_DEPTH));
    assert!(Filter::parse(&wide).is_err());
}
