//! ---
//! rfr_section: "04-remote-api"
//! rfr_subsection: "tests"
//! rfr_type: "source"
//! rfr_scope: "test"
//! rfr_description: "ARM client against a local fake resource manager."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use rfr_arm::ArmClient;
use rfr_common::config::{ProviderConfig, TimeoutConfig};
use rfr_core::{
    await_completion, Access, ClientError, ControllerSettings, FilterKey, LockRegistry,
    OperationOutcome, ReadOutcome, RemoteClient, Rule, RuleController, RuleKey, RuleSpec,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::Instant;

const TOKEN: &str = "test-token";
const SUBSCRIPTION: &str = "sub1";

type RulePath = (String, String, String, String);

#[derive(Default)]
struct FakeArm {
    base: Mutex<String>,
    filters: Mutex<HashMap<(String, String), HashMap<String, Value>>>,
    operations: Mutex<HashMap<String, (u32, Option<Value>)>>,
    next_operation: Mutex<u32>,
}

impl FakeArm {
    fn start_operation(&self, polls: u32, error: Option<Value>) -> String {
        let mut next = self.next_operation.lock();
        *next += 1;
        let id = next.to_string();
        self.operations.lock().insert(id.clone(), (polls, error));
        id
    }

    /// Remaining polls after this one, or `None` for an unknown operation.
    fn tick(&self, id: &str) -> Option<(u32, Option<Value>)> {
        let mut operations = self.operations.lock();
        let entry = operations.get_mut(id)?;
        entry.0 = entry.0.saturating_sub(1);
        Some(entry.clone())
    }
}

fn cloud_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": code, "message": message}})),
    )
        .into_response()
}

fn guard(headers: &HeaderMap, query: &Option<String>) -> Option<Response> {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str());
    if !authorized {
        return Some(cloud_error(
            StatusCode::UNAUTHORIZED,
            "AuthenticationFailed",
            "missing bearer token",
        ));
    }
    if !query
        .as_deref()
        .unwrap_or_default()
        .contains("api-version=2019-09-01")
    {
        return Some(cloud_error(
            StatusCode::BAD_REQUEST,
            "MissingApiVersionParameter",
            "api-version is required",
        ));
    }
    None
}

async fn get_rule(
    State(fake): State<Arc<FakeArm>>,
    Path((_, group, filter, rule)): Path<RulePath>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&headers, &query) {
        return rejection;
    }
    let filters = fake.filters.lock();
    match filters.get(&(group, filter)).and_then(|rules| rules.get(&rule)) {
        Some(body) => Json(body.clone()).into_response(),
        None => cloud_error(StatusCode::NOT_FOUND, "NotFound", "rule not found"),
    }
}

async fn put_rule(
    State(fake): State<Arc<FakeArm>>,
    Path((sub, group, filter, rule)): Path<RulePath>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = guard(&headers, &query) {
        return rejection;
    }
    let communities = body["properties"]["communities"].clone();
    if communities
        .as_array()
        .map(|items| items.iter().any(|item| item == "not-a-community"))
        .unwrap_or(true)
    {
        return cloud_error(
            StatusCode::BAD_REQUEST,
            "InvalidCommunity",
            "community value is malformed",
        );
    }
    let failing = communities
        .as_array()
        .map(|items| items.iter().any(|item| item == "12076:99999"))
        .unwrap_or(false);

    let mut filters = fake.filters.lock();
    let Some(rules) = filters.get_mut(&(group.clone(), filter.clone())) else {
        return cloud_error(StatusCode::NOT_FOUND, "ParentResourceNotFound", "no such filter");
    };
    let operation = if failing {
        fake.start_operation(
            1,
            Some(json!({"code": "RouteFilterRuleInvalid", "message": "community is reserved"})),
        )
    } else {
        let id = format!(
            "/subscriptions/{sub}/resourceGroups/{group}/providers/Microsoft.Network/routeFilters/{filter}/routeFilterRules/{rule}"
        );
        let mut stored = body.clone();
        stored["id"] = json!(id);
        stored["properties"]["provisioningState"] = json!("Succeeded");
        rules.insert(rule, stored);
        fake.start_operation(2, None)
    };
    let status_url = format!("{}/operations/{operation}", fake.base.lock());
    (
        StatusCode::CREATED,
        [("azure-asyncoperation", status_url)],
        Json(body),
    )
        .into_response()
}

async fn delete_rule(
    State(fake): State<Arc<FakeArm>>,
    Path((_, group, filter, rule)): Path<RulePath>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&headers, &query) {
        return rejection;
    }
    let removed = fake
        .filters
        .lock()
        .get_mut(&(group, filter))
        .and_then(|rules| rules.remove(&rule))
        .is_some();
    if !removed {
        return StatusCode::NO_CONTENT.into_response();
    }
    let operation = fake.start_operation(2, None);
    let location = format!("{}/locations/{operation}", fake.base.lock());
    (StatusCode::ACCEPTED, [("location", location)]).into_response()
}

async fn get_filter(
    State(fake): State<Arc<FakeArm>>,
    Path((sub, group, filter)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = guard(&headers, &query) {
        return rejection;
    }
    let filters = fake.filters.lock();
    let Some(rules) = filters.get(&(group.clone(), filter.clone())) else {
        return cloud_error(StatusCode::NOT_FOUND, "NotFound", "filter not found");
    };
    let mut names: Vec<_> = rules.keys().cloned().collect();
    names.sort();
    let rules: Vec<Value> = names.iter().map(|name| rules[name].clone()).collect();
    Json(json!({
        "id": format!("/subscriptions/{sub}/resourceGroups/{group}/providers/Microsoft.Network/routeFilters/{filter}"),
        "name": filter,
        "location": "westeurope",
        "properties": {"rules": rules},
    }))
    .into_response()
}

async fn operation_status(
    State(fake): State<Arc<FakeArm>>,
    Path(id): Path<String>,
) -> Response {
    match fake.tick(&id) {
        None => StatusCode::NOT_FOUND.into_response(),
        Some((0, Some(error))) => Json(json!({"status": "Failed", "error": error})).into_response(),
        Some((0, None)) => Json(json!({"status": "Succeeded"})).into_response(),
        Some(_) => Json(json!({"status": "InProgress"})).into_response(),
    }
}

async fn location_status(
    State(fake): State<Arc<FakeArm>>,
    Path(id): Path<String>,
) -> Response {
    match fake.tick(&id) {
        None => StatusCode::NOT_FOUND.into_response(),
        Some((0, _)) => StatusCode::OK.into_response(),
        Some(_) => StatusCode::ACCEPTED.into_response(),
    }
}

async fn serve() -> (Arc<FakeArm>, SocketAddr) {
    let fake = Arc::new(FakeArm::default());
    fake.filters
        .lock()
        .insert(("rg1".into(), "rf1".into()), HashMap::new());
    let rule_path = "/subscriptions/:sub/resourceGroups/:group/providers/Microsoft.Network/routeFilters/:filter/routeFilterRules/:rule";
    let app = Router::new()
        .route(
            rule_path,
            get(get_rule).put(put_rule).delete(delete_rule),
        )
        .route(
            "/subscriptions/:sub/resourceGroups/:group/providers/Microsoft.Network/routeFilters/:filter",
            get(get_filter),
        )
        .route("/operations/:id", get(operation_status))
        .route("/locations/:id", get(location_status))
        .with_state(fake.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    *fake.base.lock() = format!("http://{addr}");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (fake, addr)
}

fn provider(addr: SocketAddr) -> ProviderConfig {
    ProviderConfig {
        subscription_id: SUBSCRIPTION.into(),
        endpoint: format!("http://{addr}/"),
        request_timeout: Duration::from_secs(5),
        ..ProviderConfig::default()
    }
}

fn client(addr: SocketAddr) -> ArmClient {
    ArmClient::new(&provider(addr), Some(TOKEN.into())).unwrap()
}

fn key(name: &str) -> RuleKey {
    RuleKey::new("rg1", "rf1", name).unwrap()
}

async fn complete(operation: &dyn rfr_core::OperationHandle) -> OperationOutcome {
    await_completion(
        operation,
        Instant::now() + Duration::from_secs(5),
        Duration::from_millis(5),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn put_follows_async_operation_until_succeeded() {
    let (_fake, addr) = serve().await;
    let client = client(addr);
    let rule = Rule::new(Access::Allow, ["12076:53004"]);

    let operation = client.create_or_update_rule(&key("rule1"), &rule).await.unwrap();
    assert!(operation.describe().contains("/operations/"));
    assert_eq!(complete(operation.as_ref()).await, OperationOutcome::Succeeded);

    let remote = client.get_rule(&key("rule1")).await.unwrap().unwrap();
    assert_eq!(remote.properties, Some(rule));
    assert_eq!(remote.provisioning_state.as_deref(), Some("Succeeded"));
    assert!(remote
        .identifier()
        .unwrap()
        .ends_with("/routeFilters/rf1/routeFilterRules/rule1"));
}

#[tokio::test]
async fn missing_rule_reads_as_none() {
    let (_fake, addr) = serve().await;
    assert!(client(addr).get_rule(&key("ghost")).await.unwrap().is_none());
}

#[tokio::test]
async fn bad_request_maps_to_validation() {
    let (_fake, addr) = serve().await;
    let rule = Rule::new(Access::Allow, ["not-a-community"]);
    let err = client(addr)
        .create_or_update_rule(&key("rule1"), &rule)
        .await
        .err()
        .unwrap();
    match err {
        ClientError::Validation(message) => assert!(message.starts_with("InvalidCommunity")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failed_operation_carries_the_remote_reason() {
    let (_fake, addr) = serve().await;
    let rule = Rule::new(Access::Deny, ["12076:99999"]);
    let operation = client(addr)
        .create_or_update_rule(&key("rule1"), &rule)
        .await
        .unwrap();
    assert_eq!(
        complete(operation.as_ref()).await,
        OperationOutcome::Failed("RouteFilterRuleInvalid: community is reserved".into())
    );
}

#[tokio::test]
async fn delete_follows_location_and_tolerates_absence() {
    let (_fake, addr) = serve().await;
    let client = client(addr);
    let rule = Rule::new(Access::Allow, ["12076:53004"]);
    let put = client.create_or_update_rule(&key("rule1"), &rule).await.unwrap();
    complete(put.as_ref()).await;

    let operation = client.delete_rule(&key("rule1")).await.unwrap();
    assert!(operation.describe().contains("/locations/"));
    assert_eq!(complete(operation.as_ref()).await, OperationOutcome::Succeeded);
    assert!(client.get_rule(&key("rule1")).await.unwrap().is_none());

    let again = client.delete_rule(&key("rule1")).await.unwrap();
    assert_eq!(complete(again.as_ref()).await, OperationOutcome::Succeeded);
}

#[tokio::test]
async fn filter_lookup_expands_rules() {
    let (_fake, addr) = serve().await;
    let client = client(addr);
    for (name, community) in [("rule1", "12076:53005"), ("rule2", "12076:53006")] {
        let rule = Rule::new(Access::Allow, [community]);
        let operation = client.create_or_update_rule(&key(name), &rule).await.unwrap();
        complete(operation.as_ref()).await;
    }

    let filter = client
        .get_filter(&FilterKey::new("rg1", "rf1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(filter.location.as_deref(), Some("westeurope"));
    let names: Vec<_> = filter.rules.iter().map(|rule| rule.name.as_str()).collect();
    assert_eq!(names, ["rule1", "rule2"]);

    let missing = client
        .get_filter(&FilterKey::new("rg1", "nope").unwrap())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn unauthenticated_requests_are_unexpected_errors() {
    let (_fake, addr) = serve().await;
    let client = ArmClient::new(&provider(addr), None).unwrap();
    let err = client.get_rule(&key("rule1")).await.unwrap_err();
    assert!(matches!(err, ClientError::Unexpected(_)));
}

#[tokio::test]
async fn from_config_requires_the_token_variable() {
    let mut config = provider("127.0.0.1:1".parse().unwrap());
    config.token_env = "RFR_ARM_TEST_TOKEN_THAT_IS_NEVER_SET".into();
    assert!(ArmClient::from_config(&config).is_err());
}

#[tokio::test]
async fn controller_drives_the_http_client() {
    let (_fake, addr) = serve().await;
    let settings = ControllerSettings {
        import_protection: true,
        timeouts: TimeoutConfig {
            create: Duration::from_secs(5),
            read: Duration::from_secs(5),
            update: Duration::from_secs(5),
            delete: Duration::from_secs(5),
        },
        poll_interval: Duration::from_millis(5),
    };
    let controller = RuleController::new(
        Arc::new(client(addr)),
        Arc::new(LockRegistry::new()),
        settings,
    );
    let desired =
        RuleSpec::new(key("rule1"), Rule::new(Access::Allow, ["12076:53004"])).unwrap();

    let created = controller.create_or_update(&desired, true).await.unwrap();
    let updated = controller
        .create_or_update(
            &RuleSpec::new(key("rule1"), Rule::new(Access::Deny, ["12076:52004"])).unwrap(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);

    let read = controller.read(&created.id).await.unwrap().found().unwrap();
    assert_eq!(read.rule.unwrap().access, Access::Deny);

    controller.delete(&created.id).await.unwrap();
    assert_eq!(controller.read(&created.id).await.unwrap(), ReadOutcome::Vanished);
}
