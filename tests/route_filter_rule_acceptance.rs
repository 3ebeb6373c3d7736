//! ---
//! rfr_section: "07-testing-qa"
//! rfr_subsection: "acceptance"
//! rfr_type: "source"
//! rfr_scope: "test"
//! rfr_description: "End-to-end route filter rule scenarios against the simulated control plane."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use rfr_common::config::AppConfig;
use rfr_core::{
    AttributeMap, ControllerSettings, FilterKey, LifecycleError, LockRegistry, ResourceState,
    RuleController, RuleKey, RuleResource,
};
use rfr_testharness::InMemoryControlPlane;
use serde_json::{json, Value};

struct Acceptance {
    plane: InMemoryControlPlane,
    resource: RuleResource<InMemoryControlPlane>,
}

impl Acceptance {
    fn new() -> Self {
        let plane = InMemoryControlPlane::default();
        plane.register_filter(&FilterKey::new("acctestRG", "acctestrf").unwrap());
        plane.set_polls_to_complete(2);
        let mut settings = ControllerSettings::from_config(&AppConfig::default());
        settings.poll_interval = Duration::from_millis(1);
        let controller = RuleController::new(
            Arc::new(plane.clone()),
            Arc::new(LockRegistry::new()),
            settings,
        );
        Self {
            plane,
            resource: RuleResource::new(Arc::new(controller)),
        }
    }

    /// Verify the rule exists remotely, then import it and compare.
    async fn check_exists_and_import(&self, state: &ResourceState) {
        let read = self
            .resource
            .read(&state.id)
            .await
            .unwrap()
            .expect("rule should exist");
        assert_eq!(&read, state);
        let imported = self.resource.import(&state.id).await.unwrap();
        assert_eq!(imported.attributes, state.attributes);
    }

    async fn destroy(&self, state: &ResourceState) {
        self.resource.delete(&state.id).await.unwrap();
        assert!(self.resource.read(&state.id).await.unwrap().is_none());
    }
}

fn rule(name: &str, access: &str, communities: &[&str]) -> AttributeMap {
    serde_json::from_value(json!({
        "name": name,
        "resource_group_name": "acctestRG",
        "route_filter_name": "acctestrf",
        "access": access,
        "rule_type": "Community",
        "communities": communities,
    }))
    .unwrap()
}

/// Flattened lookup in the `communities.0` style.
fn attr(state: &ResourceState, path: &str) -> String {
    let mut value = Value::Object(state.attributes.clone().into_iter().collect());
    for segment in path.split('.') {
        value = match segment.parse::<usize>() {
            Ok(index) => value[index].clone(),
            Err(_) => value[segment].clone(),
        };
    }
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[tokio::test]
async fn basic() {
    let acc = Acceptance::new();
    let state = acc
        .resource
        .create(&rule("acctestrule", "Allow", &["12076:53004"]))
        .await
        .unwrap();
    acc.check_exists_and_import(&state).await;
    acc.destroy(&state).await;
}

#[tokio::test]
async fn requires_import() {
    let acc = Acceptance::new();
    let desired = rule("acctestrule", "Allow", &["12076:53004"]);
    let state = acc.resource.create(&desired).await.unwrap();

    let err = acc.resource.create(&desired).await.unwrap_err();
    assert!(err.to_string().contains("needs to be imported"));
    match err {
        LifecycleError::AlreadyExists { id } => assert_eq!(id, state.id),
        other => panic!("expected an import error, got {other}"),
    }
    acc.destroy(&state).await;
}

#[tokio::test]
async fn update() {
    let acc = Acceptance::new();
    let allow = rule("acctestrule", "Allow", &["12076:53004"]);
    let deny = rule("acctestrule", "Deny", &["12076:52004"]);

    let state = acc.resource.create(&allow).await.unwrap();
    assert_eq!(attr(&state, "access"), "Allow");
    assert_eq!(attr(&state, "rule_type"), "Community");
    assert_eq!(attr(&state, "communities.0"), "12076:53004");

    let state = acc.resource.update(&state, &deny).await.unwrap();
    acc.check_exists_and_import(&state).await;
    assert_eq!(attr(&state, "access"), "Deny");
    assert_eq!(attr(&state, "rule_type"), "Community");
    assert_eq!(attr(&state, "communities.0"), "12076:52004");

    let state = acc.resource.update(&state, &allow).await.unwrap();
    assert_eq!(attr(&state, "access"), "Allow");
    assert_eq!(attr(&state, "communities.0"), "12076:53004");
    acc.destroy(&state).await;
}

#[tokio::test]
async fn disappears() {
    let acc = Acceptance::new();
    let state = acc
        .resource
        .create(&rule("acctestrule", "Allow", &["12076:53004"]))
        .await
        .unwrap();
    let key = RuleKey::new("acctestRG", "acctestrf", "acctestrule").unwrap();
    assert!(acc.plane.remove_rule_out_of_band(&key));

    assert!(acc.resource.read(&state.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiple_route_filter_rules() {
    let acc = Arc::new(Acceptance::new());
    let first = {
        let acc = acc.clone();
        tokio::spawn(async move {
            acc.resource
                .create(&rule("acctestrule", "Deny", &["12076:52005", "12076:52006"]))
                .await
        })
    };
    let second = {
        let acc = acc.clone();
        tokio::spawn(async move {
            acc.resource
                .create(&rule("acctestrule1", "Allow", &["12076:53005", "12076:53006"]))
                .await
        })
    };
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(attr(&first, "communities.1"), "12076:52006");
    assert_eq!(attr(&second, "communities.1"), "12076:53006");
    acc.check_exists_and_import(&first).await;
    acc.check_exists_and_import(&second).await;

    let filter = FilterKey::new("acctestRG", "acctestrf").unwrap();
    assert!(acc.plane.recorder().overlapping_pairs(&filter).is_empty());

    acc.destroy(&first).await;
    acc.destroy(&second).await;
}
