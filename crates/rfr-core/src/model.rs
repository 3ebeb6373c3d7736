//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Typed rule, key and remote entity model."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local validation failures for keys and rule attributes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} must not contain {character:?}")]
    ReservedCharacter {
        field: &'static str,
        character: char,
    },
    #[error("communities must contain at least one entry")]
    NoCommunities,
    #[error("communities[{0}] must not be empty")]
    EmptyCommunity(usize),
    #[error("expected {field} to be one of [{allowed}], got {value:?}")]
    NotAllowed {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },
}

/// Characters that would change the shape of an identifier or request path.
pub const RESERVED_NAME_CHARACTERS: [char; 4] = ['/', '?', '#', '%'];

fn check_name(field: &'static str, value: &str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        return Err(ModelError::Empty(field));
    }
    match value.chars().find(|c| RESERVED_NAME_CHARACTERS.contains(c)) {
        Some(character) => Err(ModelError::ReservedCharacter { field, character }),
        None => Ok(()),
    }
}

/// Whether traffic matching the rule is advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Allow => "Allow",
            Access::Deny => "Deny",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = ModelError;

    // Matching is case-sensitive, as the remote API is.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(Access::Allow),
            "Deny" => Ok(Access::Deny),
            other => Err(ModelError::NotAllowed {
                field: "access",
                value: other.to_owned(),
                allowed: "Allow, Deny",
            }),
        }
    }
}

/// Kind of match the rule performs. Only BGP community matching exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RuleType {
    #[default]
    Community,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Community => "Community",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Community" => Ok(RuleType::Community),
            other => Err(ModelError::NotAllowed {
                field: "rule_type",
                value: other.to_owned(),
                allowed: "Community",
            }),
        }
    }
}

/// Identity of a route filter: the lock subject for all of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterKey {
    pub resource_group: String,
    pub route_filter: String,
}

impl FilterKey {
    pub fn new(
        resource_group: impl Into<String>,
        route_filter: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let key = Self {
            resource_group: resource_group.into(),
            route_filter: route_filter.into(),
        };
        check_name("resource_group_name", &key.resource_group)?;
        check_name("route_filter_name", &key.route_filter)?;
        Ok(key)
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route Filter {:?} (Resource Group {:?})",
            self.route_filter, self.resource_group
        )
    }
}

/// Composite key of a rule: `(group, filter, rule)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub resource_group: String,
    pub route_filter: String,
    pub name: String,
}

impl RuleKey {
    pub fn new(
        resource_group: impl Into<String>,
        route_filter: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let filter = FilterKey::new(resource_group, route_filter)?;
        let name = name.into();
        check_name("name", &name)?;
        Ok(Self {
            resource_group: filter.resource_group,
            route_filter: filter.route_filter,
            name,
        })
    }

    pub fn filter_key(&self) -> FilterKey {
        FilterKey {
            resource_group: self.resource_group.clone(),
            route_filter: self.route_filter.clone(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route Filter Rule {:?} (Route Filter {:?} / Resource Group {:?})",
            self.name, self.route_filter, self.resource_group
        )
    }
}

/// Mutable attributes of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub access: Access,
    pub rule_type: RuleType,
    /// BGP community tokens such as `12076:53004`. Order is preserved, not meaningful.
    pub communities: Vec<String>,
}

impl Rule {
    pub fn new(access: Access, communities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            access,
            rule_type: RuleType::Community,
            communities: communities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.communities.is_empty() {
            return Err(ModelError::NoCommunities);
        }
        if let Some(index) = self
            .communities
            .iter()
            .position(|community| community.trim().is_empty())
        {
            return Err(ModelError::EmptyCommunity(index));
        }
        Ok(())
    }
}

/// Desired state handed to the controller: where the rule lives and what it should say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub key: RuleKey,
    pub rule: Rule,
}

impl RuleSpec {
    pub fn new(key: RuleKey, rule: Rule) -> Result<Self, ModelError> {
        rule.validate()?;
        Ok(Self { key, rule })
    }
}

/// A rule as reported by the remote control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRule {
    pub id: Option<String>,
    pub name: String,
    pub properties: Option<Rule>,
    pub provisioning_state: Option<String>,
}

impl RemoteRule {
    /// Identifier when the remote system reported a non-empty one.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A route filter as reported by the remote control plane, including its rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFilter {
    pub id: Option<String>,
    pub name: String,
    pub location: Option<String>,
    pub rules: Vec<RemoteRule>,
}
