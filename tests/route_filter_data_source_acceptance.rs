//! ---
//! rfr_section: "07-testing-qa"
//! rfr_subsection: "acceptance"
//! rfr_type: "source"
//! rfr_scope: "test"
//! rfr_description: "Route filter data source scenarios against the simulated control plane."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use rfr_core::{Access, FilterKey, LifecycleError, RouteFilterDataSource, Rule, RuleKey};
use rfr_testharness::InMemoryControlPlane;

fn data_source(plane: &InMemoryControlPlane) -> RouteFilterDataSource<InMemoryControlPlane> {
    RouteFilterDataSource::new(Arc::new(plane.clone()), Duration::from_secs(5))
}

#[tokio::test]
async fn basic() {
    let plane = InMemoryControlPlane::default();
    plane.register_filter_in(&FilterKey::new("acctestRG", "acctestrf").unwrap(), "uksouth");

    let view = data_source(&plane).read("acctestRG", "acctestrf").await.unwrap();
    assert_eq!(view.name, "acctestrf");
    assert_eq!(view.resource_group_name, "acctestRG");
    assert_eq!(view.location.as_deref(), Some("uksouth"));
    assert_eq!(view.flat_attributes()["rule.#"], "0");
}

#[tokio::test]
async fn single_rule() {
    let plane = InMemoryControlPlane::default();
    plane.insert_rule_out_of_band(
        &RuleKey::new("acctestRG", "acctestrf", "rule1").unwrap(),
        Rule::new(Access::Allow, ["12076:53004"]),
    );

    let view = data_source(&plane).read("acctestRG", "acctestrf").await.unwrap();
    let flat = view.flat_attributes();
    assert_eq!(flat["rule.#"], "1");
    assert_eq!(flat["rule.0.name"], "rule1");
    assert_eq!(flat["rule.0.access"], "Allow");
    assert_eq!(flat["rule.0.rule_type"], "Community");
    assert_eq!(flat["rule.0.communities.0"], "12076:53004");
}

#[tokio::test]
async fn missing_filter_is_an_error() {
    let plane = InMemoryControlPlane::default();
    let err = data_source(&plane)
        .read("acctestRG", "acctestrf")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }));
    assert!(!err.is_retryable());
}
