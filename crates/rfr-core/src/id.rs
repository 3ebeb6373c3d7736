//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Resource identifier encoding and decoding."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! Resource identifier codec.
//!
//! Identifiers are path-shaped, alternating key and value segments:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{group}/providers/Microsoft.Network/routeFilters/{filter}/routeFilterRules/{rule}
//! ```
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::model::{FilterKey, ModelError, RuleKey};

const PROVIDER_NAMESPACE: &str = "Microsoft.Network";
const FILTERS_SEGMENT: &str = "routeFilters";
const RULES_SEGMENT: &str = "routeFilterRules";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier must start with '/'")]
    NotAbsolute,
    #[error("identifier contains an empty path segment")]
    EmptySegment,
    #[error("identifier has an odd number of path segments; keys and values must pair up")]
    UnpairedSegment,
    #[error("identifier is missing the {0:?} segment")]
    MissingSegment(&'static str),
    #[error("identifier repeats the {0:?} segment")]
    DuplicateSegment(String),
    #[error("identifier contains unexpected segment {0:?}")]
    UnexpectedSegment(String),
    #[error("identifier targets provider {0:?}, expected Microsoft.Network")]
    WrongProvider(String),
    #[error("identifier carries an invalid name: {0}")]
    InvalidName(#[from] ModelError),
}

/// Decoded identifier of a route filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleId {
    pub subscription_id: String,
    pub resource_group: String,
    pub route_filter: String,
    pub rule: String,
}

impl RuleId {
    pub fn new(subscription_id: impl Into<String>, key: &RuleKey) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: key.resource_group.clone(),
            route_filter: key.route_filter.clone(),
            rule: key.name.clone(),
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            resource_group: self.resource_group.clone(),
            route_filter: self.route_filter.clone(),
            name: self.rule.clone(),
        }
    }

    pub fn filter_key(&self) -> FilterKey {
        FilterKey {
            resource_group: self.resource_group.clone(),
            route_filter: self.route_filter.clone(),
        }
    }

    /// Unescaped path segments of the parent route filter.
    pub fn filter_segments<'a>(subscription_id: &'a str, filter: &'a FilterKey) -> [&'a str; 8] {
        [
            "subscriptions",
            subscription_id,
            "resourceGroups",
            &filter.resource_group,
            "providers",
            PROVIDER_NAMESPACE,
            FILTERS_SEGMENT,
            &filter.route_filter,
        ]
    }

    /// Path of the parent route filter.
    pub fn filter_path(subscription_id: &str, filter: &FilterKey) -> String {
        join_segments(&Self::filter_segments(subscription_id, filter))
    }

    /// Unescaped path segments of this rule, in identifier order.
    pub fn segments(&self) -> [&str; 10] {
        [
            "subscriptions",
            &self.subscription_id,
            "resourceGroups",
            &self.resource_group,
            "providers",
            PROVIDER_NAMESPACE,
            FILTERS_SEGMENT,
            &self.route_filter,
            RULES_SEGMENT,
            &self.rule,
        ]
    }

    /// Decode an identifier string. Equivalent to `id.parse::<RuleId>()`.
    pub fn decode(id: &str) -> Result<Self, IdError> {
        id.parse()
    }
}

fn join_segments(segments: &[&str]) -> String {
    segments.iter().fold(String::new(), |mut path, segment| {
        path.push('/');
        path.push_str(segment);
        path
    })
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_segments(&self.segments()))
    }
}

impl FromStr for RuleId {
    type Err = IdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        let Some(path) = raw.strip_prefix('/') else {
            return Err(IdError::NotAbsolute);
        };
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(IdError::EmptySegment);
        }
        if segments.len() % 2 != 0 {
            return Err(IdError::UnpairedSegment);
        }

        let mut subscription = None;
        let mut group = None;
        let mut provider = None;
        let mut filter = None;
        let mut rule = None;
        for pair in segments.chunks_exact(2) {
            let (key, value) = (pair[0], pair[1]);
            // Group and provider keys arrive in mixed case from some API versions.
            let slot = if key == "subscriptions" {
                &mut subscription
            } else if key.eq_ignore_ascii_case("resourceGroups") {
                &mut group
            } else if key.eq_ignore_ascii_case("providers") {
                &mut provider
            } else if key == FILTERS_SEGMENT {
                &mut filter
            } else if key == RULES_SEGMENT {
                &mut rule
            } else {
                return Err(IdError::UnexpectedSegment(key.to_owned()));
            };
            if slot.replace(value.to_owned()).is_some() {
                return Err(IdError::DuplicateSegment(key.to_owned()));
            }
        }

        let subscription_id = subscription.ok_or(IdError::MissingSegment("subscriptions"))?;
        let resource_group = group.ok_or(IdError::MissingSegment("resourceGroups"))?;
        let provider = provider.ok_or(IdError::MissingSegment("providers"))?;
        if !provider.eq_ignore_ascii_case(PROVIDER_NAMESPACE) {
            return Err(IdError::WrongProvider(provider));
        }
        let route_filter = filter.ok_or(IdError::MissingSegment(FILTERS_SEGMENT))?;
        let rule = rule.ok_or(IdError::MissingSegment(RULES_SEGMENT))?;

        let key = RuleKey::new(resource_group, route_filter, rule)?;
        Ok(Self::new(subscription_id, &key))
    }
}
