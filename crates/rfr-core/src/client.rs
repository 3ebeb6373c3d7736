//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Remote client contract and long-running operation polling."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::model::{FilterKey, RemoteFilter, RemoteRule, Rule, RuleKey};

/// Failures reported by a remote client implementation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected by the control plane: {0}")]
    Validation(String),
    #[error("conflicting concurrent modification: {0}")]
    Conflict(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Progress reported by a single poll of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

/// Terminal state of a long-running operation as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Handle to a remote write that completes asynchronously.
#[async_trait]
pub trait OperationHandle: Send + Sync {
    /// Short description used in logs, e.g. the polling URL.
    fn describe(&self) -> String;

    /// Ask the control plane for the current status of the operation.
    async fn poll(&self) -> Result<PollStatus, ClientError>;
}

/// An operation that was already terminal when it was submitted.
#[derive(Debug, Clone)]
pub struct CompletedOperation {
    status: PollStatus,
    description: String,
}

impl CompletedOperation {
    pub fn succeeded(description: impl Into<String>) -> Self {
        Self {
            status: PollStatus::Succeeded,
            description: description.into(),
        }
    }

    pub fn failed(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: PollStatus::Failed(reason.into()),
            description: description.into(),
        }
    }
}

#[async_trait]
impl OperationHandle for CompletedOperation {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn poll(&self) -> Result<PollStatus, ClientError> {
        Ok(self.status.clone())
    }
}

/// Contract the lifecycle controller consumes from the remote control plane.
///
/// `get_*` return `Ok(None)` when the entity does not exist; that is not an error.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_rule(&self, key: &RuleKey) -> Result<Option<RemoteRule>, ClientError>;

    /// Submit a create-or-update. The remote API has no separate update verb.
    async fn create_or_update_rule(
        &self,
        key: &RuleKey,
        rule: &Rule,
    ) -> Result<Box<dyn OperationHandle>, ClientError>;

    async fn delete_rule(&self, key: &RuleKey) -> Result<Box<dyn OperationHandle>, ClientError>;

    async fn get_filter(&self, key: &FilterKey) -> Result<Option<RemoteFilter>, ClientError>;
}

/// Poll `operation` every `interval` until it is terminal or `deadline` passes.
///
/// Poll errors are returned as-is; the caller decides whether to retry.
pub async fn await_completion(
    operation: &dyn OperationHandle,
    deadline: Instant,
    interval: Duration,
) -> Result<OperationOutcome, ClientError> {
    let mut polls = 0u32;
    loop {
        polls += 1;
        match operation.poll().await? {
            PollStatus::Succeeded => {
                debug!(operation = %operation.describe(), polls, "operation succeeded");
                return Ok(OperationOutcome::Succeeded);
            }
            PollStatus::Failed(reason) => {
                debug!(operation = %operation.describe(), polls, %reason, "operation failed");
                return Ok(OperationOutcome::Failed(reason));
            }
            PollStatus::InProgress => {}
        }
        match Instant::now().checked_add(interval) {
            Some(next) if next < deadline => sleep_until(next).await,
            _ => {
                sleep_until(deadline).await;
                return Ok(OperationOutcome::TimedOut);
            }
        }
    }
}

/// Roughly 30 years; stands in for "no deadline" when `start + timeout` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating to a far-future instant instead of panicking on overflow.
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}
