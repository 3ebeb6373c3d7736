//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Route filter rule lifecycle controller."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! Lifecycle management for route filter rules.
//!
//! A rule is always addressed relative to its route filter and resource group.
//! The [`RuleController`] translates desired state into calls on a
//! [`RemoteClient`], serialising writes per route filter through the
//! [`LockRegistry`] and reading canonical state back after every write.

pub mod client;
pub mod controller;
pub mod data_source;
pub mod error;
pub mod id;
pub mod locks;
pub mod model;
pub mod resource;
pub mod schema;

pub use client::{
    await_completion, deadline_after, ClientError, CompletedOperation, OperationHandle,
    OperationOutcome, PollStatus, RemoteClient,
};
pub use controller::{ControllerSettings, ReadOutcome, RuleController, RuleState};
pub use data_source::{RouteFilterDataSource, RouteFilterView, RuleView};
pub use error::{LifecycleError, Operation};
pub use id::{IdError, RuleId};
pub use locks::{FilterLockGuard, LockRegistry};
pub use model::{
    Access, FilterKey, ModelError, RemoteFilter, RemoteRule, Rule, RuleKey, RuleSpec, RuleType,
};
pub use resource::{ResourceState, RuleResource};
pub use schema::{AttributeMap, FieldKind, FieldSchema, SchemaError, RULE_SCHEMA};
