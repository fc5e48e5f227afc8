//! Error taxonomy surfaced by the reconciliation engine.

use thiserror::Error;

use crate::address::AddressError;
use crate::backend::BackendError;
use crate::guard::FieldViolation;

/// Errors raised while reconciling a resource.
///
/// Every variant is surfaced verbatim to the caller. [`Self::Timeout`] and
/// [`Self::Cancelled`] mean the backend operation may still be running; the
/// caller must read the resource again before deciding what to do next.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// Raised when the name is already taken within the parent scope.
    #[error("{kind} '{name}' already exists: {message}")]
    Conflict {
        /// Human-readable kind name.
        kind: String,
        /// Requested name.
        name: String,
        /// Message returned by the backend.
        message: String,
    },
    /// Raised before any backend call when an update would change an
    /// immutable field.
    #[error("cannot update {kind}: {}", render_violations(.violations))]
    ImmutableFieldViolation {
        /// Human-readable kind name.
        kind: String,
        /// One entry per offending field.
        violations: Vec<FieldViolation>,
    },
    /// Raised when a read, import or reference lookup finds nothing.
    #[error("{kind} {target} not found")]
    NotFound {
        /// Human-readable kind name.
        kind: String,
        /// Path or identifier that was looked up.
        target: String,
    },
    /// Raised when an address does not match the expected shape.
    #[error(transparent)]
    MalformedAddress(#[from] AddressError),
    /// Raised when a copy source cannot be applied to the target.
    #[error("invalid copy target: {message}")]
    InvalidCopyTarget {
        /// Reason the copy was rejected.
        message: String,
    },
    /// Raised when a copy source is incomplete or ambiguous.
    #[error("invalid source link: {message}")]
    InvalidSourceLink {
        /// Reason the source link was rejected.
        message: String,
    },
    /// Raised when the backend reports a terminal failure for an operation.
    #[error("operation {operation_id} failed: {detail}")]
    OperationFailed {
        /// Backend operation identifier.
        operation_id: String,
        /// Failure detail provided by the backend.
        detail: String,
    },
    /// Raised when polling gives up before the operation settles.
    #[error("timed out waiting for operation {operation_id} after {attempts} polls; the outcome is indeterminate")]
    Timeout {
        /// Backend operation identifier.
        operation_id: String,
        /// Number of polls issued.
        attempts: u32,
        /// Last transient error seen while polling, if any.
        last_error: Option<String>,
    },
    /// Raised when the caller cancels while an operation is pending.
    #[error("cancelled while waiting for operation {operation_id}; the outcome is indeterminate")]
    Cancelled {
        /// Backend operation identifier.
        operation_id: String,
    },
    /// Raised when a delete option is not recognised for the kind.
    #[error("{kind} does not support delete option '{option}'")]
    UnsupportedDeleteOption {
        /// Human-readable kind name.
        kind: String,
        /// Option as supplied by the caller.
        option: String,
    },
    /// Raised when the kind cannot be imported.
    #[error("{kind} does not support import")]
    ImportNotSupported {
        /// Human-readable kind name.
        kind: String,
    },
    /// Raised when a desired field is unknown, computed, or badly typed.
    #[error("invalid {kind} field '{field}': {message}")]
    Validation {
        /// Human-readable kind name.
        kind: String,
        /// Offending field.
        field: String,
        /// Reason the value was rejected.
        message: String,
    },
    /// Raised when a deleted resource is still reported after the operation
    /// settled.
    #[error("{kind} {target} still present after delete")]
    ResidualResource {
        /// Human-readable kind name.
        kind: String,
        /// Path of the resource.
        target: String,
    },
    /// Wrapper for backend failures not covered above.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ReconcileError {
    /// Whether the backend operation may still be running.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

fn render_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
