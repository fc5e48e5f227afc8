//! Backend abstraction for the storage-orchestration API.
//!
//! Mutating calls return an [`Operation`] handle that completes
//! asynchronously; reads return the resource payload or `None` when the
//! backend answers 404.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::DeleteOptions;
use crate::state::FieldMap;

/// Resource body as reported by the backend.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourcePayload {
    /// Backend-assigned identifier.
    pub id: String,
    /// User-assigned name.
    pub name: String,
    /// Whether the resource is soft-deleted and retained.
    #[serde(default)]
    pub destroyed: bool,
    /// Remaining fields, including computed ones and reference objects.
    #[serde(flatten)]
    pub fields: FieldMap,
}

/// Status of an asynchronous backend operation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Accepted but not started.
    Pending,
    /// In progress.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with an error.
    Failed,
}

impl OperationStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Handle for an asynchronous mutation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Operation {
    /// Operation identifier, never reused.
    pub id: String,
    /// Current status.
    pub status: OperationStatus,
    /// Identifier of the affected resource, when known.
    #[serde(default)]
    pub result_ref: Option<String>,
    /// Failure detail, present when the operation failed.
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// Errors raised by backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when the backend answers 404 to a mutation or operation poll.
    #[error("{path} not found")]
    NotFound {
        /// Request path that was not found.
        path: String,
    },
    /// Raised when the backend answers 409.
    #[error("conflict: {message}")]
    Conflict {
        /// Message returned by the backend.
        message: String,
    },
    /// Raised for any other non-success status.
    #[error("status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message returned by the backend.
        message: String,
    },
    /// Raised when the request could not be delivered or timed out.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying transport message.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Decoder message.
        message: String,
    },
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by storage-orchestration backends.
///
/// Paths are slash-delimited resource addresses such as
/// `/tenants/t1/tenant-spaces/s1/volumes/v1`; collections drop the trailing
/// name.
pub trait Backend: Send + Sync {
    /// Reads a resource by path. Returns `None` on 404.
    fn read<'a>(&'a self, path: &'a str)
    -> BackendFuture<'a, Option<ResourcePayload>, BackendError>;

    /// Reads a resource by identifier. Returns `None` on 404.
    fn read_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<ResourcePayload>, BackendError>;

    /// Lists every resource in a collection.
    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BackendFuture<'a, Vec<ResourcePayload>, BackendError>;

    /// Submits a create into a collection.
    fn create<'a>(
        &'a self,
        collection: &'a str,
        body: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError>;

    /// Submits a partial update of a resource.
    fn update<'a>(
        &'a self,
        path: &'a str,
        patch: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError>;

    /// Submits a delete carrying exactly the given flags.
    fn delete<'a>(
        &'a self,
        path: &'a str,
        options: &'a DeleteOptions,
    ) -> BackendFuture<'a, Operation, BackendError>;

    /// Fetches the current state of an operation.
    fn operation<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Operation, BackendError>;
}
