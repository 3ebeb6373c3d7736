//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Attribute-map boundary between the declarative engine and the typed rule model."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! The declarative engine speaks in untyped attribute maps. Everything past
//! [`expand_rule`] works on [`RuleSpec`]; everything handed back goes through
//! [`flatten_rule`].
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Access, ModelError, Rule, RuleKey, RuleSpec, RuleType};

/// Generic attribute representation exchanged with the declarative engine.
pub type AttributeMap = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    StringList,
}

/// Static description of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Changing the value forces the resource to be replaced.
    pub force_new: bool,
    pub min_items: usize,
    /// Closed set of accepted values, if any.
    pub allowed: &'static [&'static str],
}

impl FieldSchema {
    const fn string(name: &'static str, force_new: bool) -> Self {
        Self {
            name,
            kind: FieldKind::String,
            required: true,
            force_new,
            min_items: 0,
            allowed: &[],
        }
    }
}

pub const RULE_SCHEMA: &[FieldSchema] = &[
    FieldSchema::string("name", true),
    FieldSchema::string("resource_group_name", true),
    FieldSchema::string("route_filter_name", true),
    FieldSchema {
        allowed: &["Allow", "Deny"],
        ..FieldSchema::string("access", false)
    },
    FieldSchema {
        allowed: &["Community"],
        ..FieldSchema::string("rule_type", false)
    },
    FieldSchema {
        name: "communities",
        kind: FieldKind::StringList,
        required: true,
        force_new: false,
        min_items: 1,
        allowed: &[],
    },
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{0:?} is required")]
    Missing(&'static str),
    #[error("{field:?} must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("{0:?} must not be empty")]
    Empty(String),
    #[error("expected {field:?} to be one of {allowed:?}, got {value:?}")]
    NotInSlice {
        field: &'static str,
        value: String,
        allowed: &'static [&'static str],
    },
    #[error("{field:?} needs at least {min} item(s), got {got}")]
    TooFewItems {
        field: &'static str,
        min: usize,
        got: usize,
    },
    #[error("{field:?} must not contain {character:?}")]
    ReservedCharacter {
        field: &'static str,
        character: char,
    },
    #[error("unknown attribute {0:?}")]
    Unknown(String),
}

impl From<ModelError> for SchemaError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Empty(field) => SchemaError::Empty(field.to_owned()),
            ModelError::ReservedCharacter { field, character } => {
                SchemaError::ReservedCharacter { field, character }
            }
            ModelError::NoCommunities => SchemaError::TooFewItems {
                field: "communities",
                min: 1,
                got: 0,
            },
            ModelError::EmptyCommunity(index) => SchemaError::Empty(format!("communities.{index}")),
            ModelError::NotAllowed { field, value, .. } => SchemaError::NotInSlice {
                field,
                value,
                allowed: allowed_values(field),
            },
        }
    }
}

fn allowed_values(field: &str) -> &'static [&'static str] {
    RULE_SCHEMA
        .iter()
        .find(|schema| schema.name == field)
        .map(|schema| schema.allowed)
        .unwrap_or(&[])
}

/// Look up a field descriptor by name.
pub fn field(name: &str) -> Option<&'static FieldSchema> {
    RULE_SCHEMA.iter().find(|schema| schema.name == name)
}

/// Validate an attribute map and convert it into typed desired state.
///
/// `rule_type` may be omitted and defaults to `Community`; every other field is required.
pub fn expand_rule(attributes: &AttributeMap) -> Result<RuleSpec, SchemaError> {
    if let Some(unknown) = attributes.keys().find(|name| field(name).is_none()) {
        return Err(SchemaError::Unknown(unknown.clone()));
    }

    let name = required_string(attributes, "name")?;
    let resource_group = required_string(attributes, "resource_group_name")?;
    let route_filter = required_string(attributes, "route_filter_name")?;
    let access: Access = enum_value(attributes, "access")?.parse()?;
    let rule_type: RuleType = match attributes.get("rule_type") {
        None | Some(Value::Null) => RuleType::default(),
        Some(_) => enum_value(attributes, "rule_type")?.parse()?,
    };
    let communities = string_list(attributes, "communities")?;

    let key = RuleKey::new(resource_group, route_filter, name)?;
    let rule = Rule {
        access,
        rule_type,
        communities,
    };
    Ok(RuleSpec::new(key, rule)?)
}

/// Project typed state back into the attribute map shape the engine stores.
pub fn flatten_rule(key: &RuleKey, rule: &Rule) -> AttributeMap {
    let mut attributes = AttributeMap::new();
    attributes.insert("name".into(), Value::from(key.name.as_str()));
    attributes.insert(
        "resource_group_name".into(),
        Value::from(key.resource_group.as_str()),
    );
    attributes.insert(
        "route_filter_name".into(),
        Value::from(key.route_filter.as_str()),
    );
    attributes.insert("access".into(), Value::from(rule.access.as_str()));
    attributes.insert("rule_type".into(), Value::from(rule.rule_type.as_str()));
    attributes.insert(
        "communities".into(),
        Value::Array(rule.communities.iter().cloned().map(Value::from).collect()),
    );
    attributes
}

/// Force-new fields whose value differs between `old` and `new`.
pub fn requires_replacement(old: &AttributeMap, new: &AttributeMap) -> Vec<&'static str> {
    RULE_SCHEMA
        .iter()
        .filter(|schema| schema.force_new && old.get(schema.name) != new.get(schema.name))
        .map(|schema| schema.name)
        .collect()
}

fn required_string<'a>(
    attributes: &'a AttributeMap,
    name: &'static str,
) -> Result<&'a str, SchemaError> {
    match attributes.get(name) {
        None | Some(Value::Null) => Err(SchemaError::Missing(name)),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(SchemaError::Empty(name.to_owned()))
        }
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(SchemaError::WrongType {
            field: name,
            expected: "string",
        }),
    }
}

fn enum_value<'a>(attributes: &'a AttributeMap, name: &'static str) -> Result<&'a str, SchemaError> {
    let value = required_string(attributes, name)?;
    let allowed = allowed_values(name);
    if !allowed.iter().any(|candidate| *candidate == value) {
        return Err(SchemaError::NotInSlice {
            field: name,
            value: value.to_owned(),
            allowed,
        });
    }
    Ok(value)
}

fn string_list(attributes: &AttributeMap, name: &'static str) -> Result<Vec<String>, SchemaError> {
    let Some(value) = attributes.get(name).filter(|value| !value.is_null()) else {
        return Err(SchemaError::Missing(name));
    };
    let Value::Array(items) = value else {
        return Err(SchemaError::WrongType {
            field: name,
            expected: "list of strings",
        });
    };
    let min = field(name).map(|schema| schema.min_items).unwrap_or(0);
    if items.len() < min {
        return Err(SchemaError::TooFewItems {
            field: name,
            min,
            got: items.len(),
        });
    }
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(text) if text.trim().is_empty() => {
                Err(SchemaError::Empty(format!("{name}.{index}")))
            }
            Value::String(text) => Ok(text.clone()),
            _ => Err(SchemaError::WrongType {
                field: name,
                expected: "list of strings",
            }),
        })
        .collect()
}
