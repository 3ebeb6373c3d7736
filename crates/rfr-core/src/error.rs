//! ---
//! rfr_section: "02-lifecycle-controller"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Lifecycle error taxonomy."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;
use crate::id::IdError;
use crate::model::ModelError;
use crate::schema::SchemaError;

/// Result alias used throughout the controller.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Lifecycle verb an error or metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
    DataSourceRead,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
            Operation::DataSourceRead => "data_source_read",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the lifecycle controller.
///
/// `target` fields hold the display form of the rule or filter key involved.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("a resource with the ID {id:?} already exists - to be managed via this tool it needs to be imported")]
    AlreadyExists { id: String },
    #[error("malformed identifier {id:?}: {source}")]
    MalformedIdentifier {
        id: String,
        #[source]
        source: IdError,
    },
    #[error("invalid attributes: {0}")]
    InvalidAttributes(#[from] SchemaError),
    #[error("invalid desired state: {0}")]
    InvalidModel(#[from] ModelError),
    #[error("{operation} of {target} failed: {source}")]
    Transient {
        operation: Operation,
        target: String,
        #[source]
        source: ClientError,
    },
    #[error("{operation} of {target} rejected by the control plane: {message}")]
    Validation {
        operation: Operation,
        target: String,
        message: String,
    },
    #[error("{operation} of {target} did not complete: {reason}")]
    Operation {
        operation: Operation,
        target: String,
        reason: String,
    },
    #[error("{operation} of {target} timed out after {after:?}")]
    TimedOut {
        operation: Operation,
        target: String,
        after: Duration,
    },
    #[error("cannot read {target} ID after a successful write")]
    ReadAfterWriteMissing { target: String },
    #[error("{target} was not found")]
    NotFound { operation: Operation, target: String },
}

impl LifecycleError {
    /// Map a client failure onto the controller taxonomy.
    pub fn from_client(operation: Operation, target: impl fmt::Display, err: ClientError) -> Self {
        match err {
            ClientError::Validation(message) => LifecycleError::Validation {
                operation,
                target: target.to_string(),
                message,
            },
            other => LifecycleError::Transient {
                operation,
                target: target.to_string(),
                source: other,
            },
        }
    }

    /// Whether repeating the same call could succeed without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Transient { .. } | LifecycleError::TimedOut { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_keep_their_message() {
        let err = LifecycleError::from_client(
            Operation::Create,
            "rule1",
            ClientError::Validation("community 'x' is invalid".into()),
        );
        assert!(matches!(err, LifecycleError::Validation { .. }));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "create of rule1 rejected by the control plane: community 'x' is invalid"
        );
    }

    #[test]
    fn conflicts_surface_as_transient() {
        let err = LifecycleError::from_client(
            Operation::Delete,
            "rule1",
            ClientError::Conflict("etag mismatch".into()),
        );
        assert!(matches!(err, LifecycleError::Transient { .. }));
        assert!(err.is_retryable());
    }
}
