//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Attribute-map facing resource adapter over the rule controller."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::RemoteClient;
use crate::controller::{RuleController, RuleState};
use crate::error::Result;
use crate::schema::{self, AttributeMap};

/// What the declarative engine persists for one managed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: String,
    pub attributes: AttributeMap,
}

impl ResourceState {
    fn from_rule_state(state: RuleState) -> Self {
        let attributes = match &state.rule {
            Some(rule) => schema::flatten_rule(&state.key, rule),
            None => {
                let mut attributes = AttributeMap::new();
                attributes.insert("name".into(), state.key.name.clone().into());
                attributes.insert(
                    "resource_group_name".into(),
                    state.key.resource_group.clone().into(),
                );
                attributes.insert(
                    "route_filter_name".into(),
                    state.key.route_filter.clone().into(),
                );
                attributes
            }
        };
        Self {
            id: state.id,
            attributes,
        }
    }
}

/// The `route_filter_rule` resource as the declarative engine sees it.
pub struct RuleResource<C: ?Sized> {
    controller: Arc<RuleController<C>>,
}

impl<C: RemoteClient + ?Sized> RuleResource<C> {
    pub fn new(controller: Arc<RuleController<C>>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<RuleController<C>> {
        &self.controller
    }

    pub async fn create(&self, attributes: &AttributeMap) -> Result<ResourceState> {
        let desired = schema::expand_rule(attributes)?;
        let state = self.controller.create_or_update(&desired, true).await?;
        Ok(ResourceState::from_rule_state(state))
    }

    /// Apply `desired` over `prior`.
    ///
    /// A change to a force-new attribute replaces the rule: the old one is deleted and
    /// the new one created, import protection included.
    pub async fn update(
        &self,
        prior: &ResourceState,
        desired: &AttributeMap,
    ) -> Result<ResourceState> {
        let spec = schema::expand_rule(desired)?;
        let replaced = schema::requires_replacement(&prior.attributes, desired);
        if !replaced.is_empty() {
            info!(id = %prior.id, fields = ?replaced, "force-new attributes changed; replacing rule");
            self.controller.delete(&prior.id).await?;
            let state = self.controller.create_or_update(&spec, true).await?;
            return Ok(ResourceState::from_rule_state(state));
        }
        let state = self.controller.create_or_update(&spec, false).await?;
        Ok(ResourceState::from_rule_state(state))
    }

    /// `None` means the rule vanished and should be dropped from state.
    pub async fn read(&self, id: &str) -> Result<Option<ResourceState>> {
        let outcome = self.controller.read(id).await?;
        Ok(outcome.found().map(ResourceState::from_rule_state))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.controller.delete(id).await
    }

    pub async fn import(&self, id: &str) -> Result<ResourceState> {
        let state = self.controller.import(id).await?;
        Ok(ResourceState::from_rule_state(state))
    }
}
