//! Delete: `Present -> Deleting -> {Absent | Destroyed}`.

use tracing::{info, warn};

use crate::address::{ImportAddress, ResourceHandle};
use crate::backend::{Backend, BackendError};
use crate::descriptor::{DeleteFlag, DeleteOptions, ResourceDescriptor};
use crate::error::ReconcileError;
use crate::poller::Visibility;
use crate::state::{DeleteOutcome, LifecycleState};

use super::Reconciler;

impl<B> Reconciler<B>
where
    B: Backend,
{
    /// Deletes a resource, sending exactly the requested flags.
    ///
    /// Deleting a resource the backend no longer knows succeeds with
    /// [`DeleteOutcome::Absent`]. Soft-delete kinds end in
    /// [`DeleteOutcome::Destroyed`] unless eradication was requested.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnsupportedDeleteOption`] before any backend
    /// call when a flag is not declared by the kind,
    /// [`ReconcileError::ResidualResource`] when the resource is still live
    /// after the operation settled, and the polling errors of
    /// [`Reconciler::create`].
    pub async fn delete(
        &self,
        handle: &ResourceHandle,
        descriptor: &ResourceDescriptor,
        options: &DeleteOptions,
    ) -> Result<DeleteOutcome, ReconcileError> {
        descriptor.check_delete_options(options)?;
        let path = ImportAddress::for_handle(handle, descriptor)?.path();

        info!(
            kind = descriptor.kind.as_str(),
            name = %handle.name,
            state = %LifecycleState::Deleting,
            options = ?options.iter().map(DeleteFlag::as_str).collect::<Vec<_>>(),
            "submitting delete"
        );
        let operation = match self.backend.delete(&path, options).await {
            Ok(operation) => operation,
            Err(BackendError::NotFound { .. }) => {
                info!(
                    kind = descriptor.kind.as_str(),
                    name = %handle.name,
                    "resource already absent"
                );
                return Ok(DeleteOutcome::Absent);
            }
            Err(err) => return Err(err.into()),
        };

        let outcome = match self
            .await_settled(operation, &path, Visibility::Gone)
            .await?
        {
            None => DeleteOutcome::Absent,
            Some(payload)
                if payload.destroyed
                    && descriptor.soft_delete
                    && !options.contains(DeleteFlag::Eradicate) =>
            {
                DeleteOutcome::Destroyed(Self::observe(payload, &handle.parent, descriptor))
            }
            Some(_) => {
                warn!(
                    kind = descriptor.kind.as_str(),
                    name = %handle.name,
                    "resource still reported after delete"
                );
                return Err(ReconcileError::ResidualResource {
                    kind: descriptor.display_name.to_owned(),
                    target: path,
                });
            }
        };
        info!(
            kind = descriptor.kind.as_str(),
            name = %handle.name,
            state = %outcome.state(),
            "delete settled"
        );
        Ok(outcome)
    }
}
