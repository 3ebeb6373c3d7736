//! ---
//! rfr_section: "04-remote-api"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "JSON wire types for route filter and rule payloads."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use rfr_core::{Access, RemoteFilter, RemoteRule, Rule, RuleType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_filter_rule_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<RuleProperties>,
}

impl RuleResource {
    /// Request body for a create-or-update.
    pub fn for_put(name: &str, rule: &Rule) -> Self {
        Self {
            id: None,
            name: Some(name.to_owned()),
            properties: Some(RuleProperties {
                access: Some(rule.access.to_string()),
                route_filter_rule_type: Some(rule.rule_type.to_string()),
                communities: Some(rule.communities.clone()),
                provisioning_state: None,
            }),
        }
    }

    pub fn into_remote(self, fallback_name: &str) -> Result<RemoteRule> {
        let name = self.name.unwrap_or_else(|| fallback_name.to_owned());
        let (properties, provisioning_state) = match self.properties {
            Some(properties) => {
                let provisioning_state = properties.provisioning_state.clone();
                (properties_to_rule(properties, &name)?, provisioning_state)
            }
            None => (None, None),
        };
        Ok(RemoteRule {
            id: self.id,
            name,
            properties,
            provisioning_state,
        })
    }
}

fn properties_to_rule(properties: RuleProperties, name: &str) -> Result<Option<Rule>> {
    let Some(access) = properties.access else {
        return Ok(None);
    };
    let access: Access = access
        .parse()
        .with_context(|| format!("rule {name} reported an unknown access value"))?;
    let rule_type: RuleType = match properties.route_filter_rule_type {
        Some(rule_type) => rule_type
            .parse()
            .with_context(|| format!("rule {name} reported an unknown rule type"))?,
        None => RuleType::default(),
    };
    Ok(Some(Rule {
        access,
        rule_type,
        communities: properties.communities.unwrap_or_default(),
    }))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterProperties {
    #[serde(default)]
    pub rules: Option<Vec<RuleResource>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Option<FilterProperties>,
}

impl FilterResource {
    pub fn into_remote(self, fallback_name: &str) -> Result<RemoteFilter> {
        let rules = self
            .properties
            .and_then(|properties| properties.rules)
            .unwrap_or_default()
            .into_iter()
            .map(|rule| rule.into_remote(""))
            .collect::<Result<Vec<_>>>()?;
        Ok(RemoteFilter {
            id: self.id,
            name: self.name.unwrap_or_else(|| fallback_name.to_owned()),
            location: self.location,
            rules,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorDetail {
    pub fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "no error detail".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudError {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

/// Body returned by an `Azure-AsyncOperation` status URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}
