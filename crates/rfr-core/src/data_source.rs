//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Read-only route filter data source exposing a filter and its rules."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::RemoteClient;
use crate::error::{LifecycleError, Operation, Result};
use crate::model::{FilterKey, RemoteRule};
use crate::schema::AttributeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleView {
    pub name: String,
    pub access: String,
    pub rule_type: String,
    pub communities: Vec<String>,
}

impl From<&RemoteRule> for RuleView {
    fn from(remote: &RemoteRule) -> Self {
        let (access, rule_type, communities) = match &remote.properties {
            Some(rule) => (
                rule.access.to_string(),
                rule.rule_type.to_string(),
                rule.communities.clone(),
            ),
            None => (String::new(), String::new(), Vec::new()),
        };
        Self {
            name: remote.name.clone(),
            access,
            rule_type,
            communities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFilterView {
    pub id: String,
    pub name: String,
    pub resource_group_name: String,
    pub location: Option<String>,
    pub rules: Vec<RuleView>,
}

impl RouteFilterView {
    /// Nested attribute form, with rules under the `rule` block.
    pub fn to_attributes(&self) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        attributes.insert("id".into(), self.id.clone().into());
        attributes.insert("name".into(), self.name.clone().into());
        attributes.insert(
            "resource_group_name".into(),
            self.resource_group_name.clone().into(),
        );
        attributes.insert(
            "location".into(),
            self.location.clone().map(Value::from).unwrap_or(Value::Null),
        );
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "name": rule.name,
                    "access": rule.access,
                    "rule_type": rule.rule_type,
                    "communities": rule.communities,
                })
            })
            .collect();
        attributes.insert("rule".into(), Value::Array(rules));
        attributes
    }

    /// Flattened `rule.#` / `rule.0.name` style keys.
    pub fn flat_attributes(&self) -> IndexMap<String, String> {
        let mut flat = IndexMap::new();
        flat.insert("id".to_owned(), self.id.clone());
        flat.insert("name".to_owned(), self.name.clone());
        flat.insert(
            "resource_group_name".to_owned(),
            self.resource_group_name.clone(),
        );
        if let Some(location) = &self.location {
            flat.insert("location".to_owned(), location.clone());
        }
        flat.insert("rule.#".to_owned(), self.rules.len().to_string());
        for (index, rule) in self.rules.iter().enumerate() {
            let prefix = format!("rule.{index}");
            flat.insert(format!("{prefix}.name"), rule.name.clone());
            flat.insert(format!("{prefix}.access"), rule.access.clone());
            flat.insert(format!("{prefix}.rule_type"), rule.rule_type.clone());
            flat.insert(
                format!("{prefix}.communities.#"),
                rule.communities.len().to_string(),
            );
            for (position, community) in rule.communities.iter().enumerate() {
                flat.insert(format!("{prefix}.communities.{position}"), community.clone());
            }
        }
        flat
    }
}

/// Looks up an existing route filter. Unlike the rule resource, a missing filter is an error.
pub struct RouteFilterDataSource<C: ?Sized> {
    client: Arc<C>,
    timeout: Duration,
}

impl<C: RemoteClient + ?Sized> RouteFilterDataSource<C> {
    pub fn new(client: Arc<C>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn read(&self, resource_group: &str, name: &str) -> Result<RouteFilterView> {
        let key = FilterKey::new(resource_group, name)?;
        let target = key.to_string();
        let fetched = tokio::time::timeout(self.timeout, self.client.get_filter(&key))
            .await
            .map_err(|_| LifecycleError::TimedOut {
                operation: Operation::DataSourceRead,
                target: target.clone(),
                after: self.timeout,
            })?
            .map_err(|err| LifecycleError::from_client(Operation::DataSourceRead, &key, err))?;
        let Some(filter) = fetched else {
            return Err(LifecycleError::NotFound {
                operation: Operation::DataSourceRead,
                target,
            });
        };
        debug!(route_filter = %filter.name, rules = filter.rules.len(), "route filter read");
        Ok(RouteFilterView {
            id: filter.id.unwrap_or_default(),
            name: filter.name,
            resource_group_name: key.resource_group,
            location: filter.location,
            rules: filter.rules.iter().map(RuleView::from).collect(),
        })
    }
}
