//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Route filter rule lifecycle controller."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rfr_common::config::{AppConfig, TimeoutConfig};
use rfr_metrics::LifecycleMetrics;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{await_completion, deadline_after, OperationOutcome, RemoteClient};
use crate::error::{LifecycleError, Operation, Result};
use crate::id::RuleId;
use crate::locks::LockRegistry;
use crate::model::{RemoteRule, Rule, RuleKey, RuleSpec};

/// Knobs for the lifecycle controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Refuse to create a rule that already exists remotely.
    pub import_protection: bool,
    pub timeouts: TimeoutConfig,
    pub poll_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            import_protection: config.features.resources_must_be_imported,
            timeouts: config.timeouts,
            poll_interval: config.polling.interval,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Observed state of a managed rule, keyed by its stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleState {
    pub id: String,
    pub key: RuleKey,
    /// Absent when the control plane returned the rule without properties.
    pub rule: Option<Rule>,
}

/// Result of reading a rule by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(RuleState),
    /// The rule no longer exists remotely; the caller should drop it from state.
    Vanished,
}

impl ReadOutcome {
    pub fn found(self) -> Option<RuleState> {
        match self {
            ReadOutcome::Found(state) => Some(state),
            ReadOutcome::Vanished => None,
        }
    }
}

/// Drives create, read, update and delete of route filter rules against a remote client.
///
/// The controller keeps no state between calls. Writes to rules under the same
/// route filter are serialised through the shared [`LockRegistry`].
pub struct RuleController<C: ?Sized> {
    client: Arc<C>,
    locks: Arc<LockRegistry>,
    settings: ControllerSettings,
    metrics: Option<LifecycleMetrics>,
}

impl<C: RemoteClient + ?Sized> RuleController<C> {
    pub fn new(client: Arc<C>, locks: Arc<LockRegistry>, settings: ControllerSettings) -> Self {
        Self {
            client,
            locks,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Create the rule when `is_new_resource`, otherwise update it in place.
    ///
    /// Returns the canonical state read back after the write completed.
    pub async fn create_or_update(
        &self,
        desired: &RuleSpec,
        is_new_resource: bool,
    ) -> Result<RuleState> {
        let (operation, timeout) = if is_new_resource {
            (Operation::Create, self.settings.timeouts.create)
        } else {
            (Operation::Update, self.settings.timeouts.update)
        };
        let target = desired.key.to_string();
        self.instrument(
            operation,
            target,
            timeout,
            self.apply(desired, is_new_resource, operation, timeout),
        )
        .await
    }

    /// Re-fetch the rule behind `id`. A missing rule is reported as [`ReadOutcome::Vanished`].
    pub async fn read(&self, id: &str) -> Result<ReadOutcome> {
        let rule_id = decode(id)?;
        let key = rule_id.key();
        let target = key.to_string();
        self.instrument(
            Operation::Read,
            target,
            self.settings.timeouts.read,
            self.fetch(id, &key, Operation::Read),
        )
        .await
    }

    /// Adopt an existing rule by identifier alone.
    ///
    /// Unlike [`read`](Self::read), a missing rule is an error: there is nothing to import.
    pub async fn import(&self, id: &str) -> Result<RuleState> {
        let rule_id = decode(id)?;
        let key = rule_id.key();
        let target = key.to_string();
        let outcome = self
            .instrument(
                Operation::Import,
                target.clone(),
                self.settings.timeouts.read,
                self.fetch(id, &key, Operation::Import),
            )
            .await?;
        outcome.found().ok_or(LifecycleError::NotFound {
            operation: Operation::Import,
            target,
        })
    }

    /// Delete the rule behind `id`. Completion of the remote operation is the only success signal.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let rule_id = decode(id)?;
        let key = rule_id.key();
        let target = key.to_string();
        let timeout = self.settings.timeouts.delete;
        self.instrument(Operation::Delete, target, timeout, self.remove(&key, timeout))
            .await
    }

    async fn apply(
        &self,
        desired: &RuleSpec,
        is_new_resource: bool,
        operation: Operation,
        timeout: Duration,
    ) -> Result<RuleState> {
        let deadline = deadline_after(Instant::now(), timeout);
        let key = &desired.key;
        desired.rule.validate()?;

        if is_new_resource && self.settings.import_protection {
            let existing = self
                .client
                .get_rule(key)
                .await
                .map_err(|err| LifecycleError::from_client(operation, key, err))?;
            if let Some(id) = existing.as_ref().and_then(RemoteRule::identifier) {
                warn!(group = %key.resource_group, route_filter = %key.route_filter, rule = %key.name, %id, "rule already exists remotely");
                return Err(LifecycleError::AlreadyExists { id: id.to_owned() });
            }
        }

        {
            let _guard = self.lock(key).await;
            let handle = self
                .client
                .create_or_update_rule(key, &desired.rule)
                .await
                .map_err(|err| LifecycleError::from_client(operation, key, err))?;
            debug!(rule = %key.name, operation = %handle.describe(), "create/update submitted");
            let outcome =
                await_completion(handle.as_ref(), deadline, self.settings.poll_interval)
                    .await
                    .map_err(|err| LifecycleError::from_client(operation, key, err))?;
            check_outcome(outcome, operation, key, timeout)?;
        }

        let read = self
            .client
            .get_rule(key)
            .await
            .map_err(|err| LifecycleError::from_client(operation, key, err))?;
        let Some(id) = read.as_ref().and_then(RemoteRule::identifier) else {
            return Err(LifecycleError::ReadAfterWriteMissing {
                target: key.to_string(),
            });
        };
        let state = RuleState {
            id: id.to_owned(),
            key: key.clone(),
            rule: read.as_ref().and_then(|remote| remote.properties.clone()),
        };
        info!(group = %key.resource_group, route_filter = %key.route_filter, rule = %key.name, id = %state.id, %operation, "rule applied");
        Ok(state)
    }

    async fn fetch(&self, id: &str, key: &RuleKey, operation: Operation) -> Result<ReadOutcome> {
        let remote = self
            .client
            .get_rule(key)
            .await
            .map_err(|err| LifecycleError::from_client(operation, key, err))?;
        let Some(remote) = remote else {
            info!(group = %key.resource_group, route_filter = %key.route_filter, rule = %key.name, "rule vanished remotely; removing from state");
            return Ok(ReadOutcome::Vanished);
        };
        Ok(ReadOutcome::Found(RuleState {
            id: id.to_owned(),
            key: key.clone(),
            rule: remote.properties,
        }))
    }

    async fn remove(&self, key: &RuleKey, timeout: Duration) -> Result<()> {
        let deadline = deadline_after(Instant::now(), timeout);
        let _guard = self.lock(key).await;
        let handle = self
            .client
            .delete_rule(key)
            .await
            .map_err(|err| LifecycleError::from_client(Operation::Delete, key, err))?;
        debug!(rule = %key.name, operation = %handle.describe(), "delete submitted");
        let outcome =
            await_completion(handle.as_ref(), deadline, self.settings.poll_interval)
                .await
                .map_err(|err| LifecycleError::from_client(Operation::Delete, key, err))?;
        check_outcome(outcome, Operation::Delete, key, timeout)?;
        info!(group = %key.resource_group, route_filter = %key.route_filter, rule = %key.name, "rule deleted");
        Ok(())
    }

    async fn lock(&self, key: &RuleKey) -> crate::locks::FilterLockGuard<'_> {
        let waiting = Instant::now();
        let guard = self.locks.acquire(&key.filter_key()).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_lock_wait(waiting.elapsed());
        }
        guard
    }

    /// Bound `work` by `timeout` and record the outcome.
    async fn instrument<T>(
        &self,
        operation: Operation,
        target: String,
        timeout: Duration,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::TimedOut {
                operation,
                target,
                after: timeout,
            }),
        };
        if let Err(err) = &result {
            warn!(%operation, error = %err, "lifecycle operation failed");
        }
        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "success" } else { "error" };
            metrics.observe_operation(operation.as_str(), outcome, started.elapsed());
        }
        result
    }
}

fn decode(id: &str) -> Result<RuleId> {
    RuleId::decode(id).map_err(|source| LifecycleError::MalformedIdentifier {
        id: id.to_owned(),
        source,
    })
}

fn check_outcome(
    outcome: OperationOutcome,
    operation: Operation,
    key: &RuleKey,
    timeout: Duration,
) -> Result<()> {
    match outcome {
        OperationOutcome::Succeeded => Ok(()),
        OperationOutcome::Failed(reason) => Err(LifecycleError::Operation {
            operation,
            target: key.to_string(),
            reason,
        }),
        OperationOutcome::TimedOut => Err(LifecycleError::TimedOut {
            operation,
            target: key.to_string(),
            after: timeout,
        }),
    }
}
