//! Error types for the Stratus orchestrator
//!
//! Errors fall into four families that the pipeline treats differently:
//!
//! - user-facing configuration errors ([`Error::User`]) carry a stable code and
//!   message and are never retried automatically
//! - transient errors (conflicts, not-found-yet observations) are retried
//!   in-process by the store, the conflict policy or a Condition's poll loop
//! - everything else is fatal for the current run and surfaces verbatim
//! - cleanup errors never reach this type; callers log them and move on

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Error code for a request the caller is not permitted to make
pub const CLOUD_ERROR_CODE_FORBIDDEN: &str = "Forbidden";
/// Error code for a load balancer that still has a private link service attached
pub const CLOUD_ERROR_CODE_CANNOT_DELETE_LOAD_BALANCER_BY_ID: &str =
    "CannotDeleteLoadBalancerWithPrivateLinkService";
/// Error code for a subnet that is still referenced by another resource
pub const CLOUD_ERROR_CODE_IN_USE_SUBNET_CANNOT_BE_DELETED: &str = "InUseSubnetCannotBeDeleted";
/// Error code for a resource protected by a management lock
pub const CLOUD_ERROR_CODE_SCOPE_LOCKED: &str = "ScopeLocked";
/// Error code for a subnet that cannot be read or updated
pub const CLOUD_ERROR_CODE_INVALID_LINKED_VNET: &str = "InvalidLinkedVNet";
/// Error code for a deployment that did not converge
pub const CLOUD_ERROR_CODE_DEPLOYMENT_FAILED: &str = "DeploymentFailed";
/// Error code returned by cloud APIs when the caller lacks permission
pub const AUTHORIZATION_FAILED: &str = "AuthorizationFailed";

/// A structured, user-facing error payload.
///
/// Surfaced verbatim to the caller's async-operation tracker. The code is
/// stable and machine-readable; the message is for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudError {
    /// HTTP status the frontend reports
    pub status: u16,
    /// Stable error code (e.g. "InvalidLinkedVNet")
    pub code: String,
    /// Resource or operation the error refers to
    pub target: String,
    /// Human-readable explanation
    pub message: String,
}

impl CloudError {
    /// Create a new user-facing error
    pub fn new(
        status: u16,
        code: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            target: target.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}: {}",
            self.status, self.code, self.target, self.message
        )
    }
}

/// Main error type for Stratus operations
#[derive(Debug, Error)]
pub enum Error {
    /// Structured error meant for the end user; not retried automatically
    #[error("{0}")]
    User(CloudError),

    /// Error returned by a cloud resource API
    #[error("cloud error [{status} {code}] on {resource}: {message}")]
    Cloud {
        /// HTTP status returned by the API
        status: u16,
        /// Service error code (e.g. "AuthorizationFailed", "NotFound")
        code: String,
        /// Resource the call was made against
        resource: String,
        /// Error message from the service
        message: String,
    },

    /// Kubernetes API error from the managed cluster
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic-concurrency conflict on a document or managed-cluster object
    #[error("conflict updating {resource}")]
    Conflict {
        /// Key or name of the contended object
        resource: String,
    },

    /// The document is leased by another worker
    #[error("lease on {key} is held by {holder}")]
    LeaseLost {
        /// Document key
        key: String,
        /// Current lease holder
        holder: String,
    },

    /// Document store failure other than a conflict
    #[error("document store error for {key}: {message}")]
    Store {
        /// Document key
        key: String,
        /// Description of what failed
        message: String,
        /// Whether the document was missing
        not_found: bool,
    },

    /// A Condition step did not become ready within its timeout
    #[error("timed out waiting for the condition")]
    ConditionTimeout {
        /// Description of the step that timed out
        step: String,
        /// The configured timeout
        timeout: Duration,
    },

    /// The run was cancelled through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// The persisted install phase is not one this orchestrator knows
    #[error("unrecognised install phase {0}")]
    UnknownPhase(i32),

    /// Invalid configuration or document content
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path, if known
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a cloud API error
    pub fn cloud(
        status: u16,
        code: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Cloud {
            status,
            code: code.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a 404 cloud error for the given resource
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::cloud(404, "NotFound", resource.clone(), format!("{} was not found", resource))
    }

    /// Create a user-facing error
    pub fn user(
        status: u16,
        code: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::User(CloudError::new(status, code, target, message))
    }

    /// Create a conflict error
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the error reports a missing resource or document
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Cloud { status, .. } => *status == 404,
            Error::Kube { source } => matches!(source, kube::Error::Api(ae) if ae.code == 404),
            Error::Store { not_found, .. } => *not_found,
            _ => false,
        }
    }

    /// True if the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube { source } => matches!(source, kube::Error::Api(ae) if ae.code == 409),
            _ => false,
        }
    }

    /// True if the error is a 403 the caller may fix by refreshing its token
    pub fn is_authorization_failed(&self) -> bool {
        match self {
            Error::Cloud { status, code, .. } => *status == 403 && code == AUTHORIZATION_FAILED,
            _ => false,
        }
    }

    /// Check if this error is retryable by re-running the pipeline
    ///
    /// User-facing, validation, serialization and unknown-phase errors require
    /// a human to fix something first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::User(_) => false,
            Error::Cloud { status, .. } => !(400..500).contains(status) || *status == 409,
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Conflict { .. } => true,
            Error::LeaseLost { .. } => false,
            Error::Store { .. } => true,
            Error::ConditionTimeout { .. } => true,
            Error::Cancelled => true,
            Error::UnknownPhase(_) => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
