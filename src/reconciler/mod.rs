//! Generic lifecycle reconciliation.
//!
//! One [`Reconciler`] drives every resource kind through
//! `Absent -> Creating -> Present -> Updating -> Present -> Deleting ->
//! {Absent | Destroyed}`. Kind-specific behaviour comes entirely from the
//! [`ResourceDescriptor`] passed to each operation.

mod create;
mod delete;
mod import;
mod update;


use tokio::sync::watch;
use tracing::debug;

use crate::address::{self, AddressSegment, ImportAddress, ResourceHandle};
use crate::backend::{Backend, BackendError, Operation, ResourcePayload};
use crate::descriptor::{ResourceDescriptor, ValueKind};
use crate::error::ReconcileError;
use crate::poller::{OperationPoller, PollPolicy, Visibility};
use crate::state::{FieldMap, FieldValue, ObservedResource, ReadOutcome};

/// Lifecycle engine over a [`Backend`].
///
/// Takes `&self` everywhere: distinct instances may be reconciled
/// concurrently, and mutations on the same instance must be serialised by
/// the caller.
pub struct Reconciler<B> {
    backend: B,
    policy: PollPolicy,
    cancellation: Option<watch::Receiver<bool>>,
}

impl<B> Reconciler<B>
where
    B: Backend,
{
    /// Creates a reconciler that waits for operations using `policy`.
    #[must_use]
    pub const fn new(backend: B, policy: PollPolicy) -> Self {
        Self {
            backend,
            policy,
            cancellation: None,
        }
    }

    /// Stops waiting for operations once `true` is sent on the channel.
    ///
    /// Dropping the sender never cancels.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: watch::Receiver<bool>) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Returns the underlying backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the poll policy.
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Reads a resource by identity.
    ///
    /// Reads by `id` when known and by address otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MalformedAddress`] when an unresolved handle
    /// does not fit the kind's address shape, and [`ReconcileError::Backend`]
    /// when the read fails.
    pub async fn read(
        &self,
        handle: &ResourceHandle,
        descriptor: &ResourceDescriptor,
    ) -> Result<ReadOutcome, ReconcileError> {
        let payload = if handle.id.is_empty() {
            let target = ImportAddress::for_handle(handle, descriptor)?;
            self.backend.read(&target.path()).await?
        } else {
            self.backend.read_by_id(&handle.id).await?
        };
        let outcome = payload.map_or(ReadOutcome::Absent, |found| {
            let observed = Self::observe(found, &handle.parent, descriptor);
            if observed.destroyed {
                ReadOutcome::Destroyed(observed)
            } else {
                ReadOutcome::Present(observed)
            }
        });
        debug!(
            kind = descriptor.kind.as_str(),
            name = %handle.name,
            state = %outcome.state(),
            "read resource"
        );
        Ok(outcome)
    }

    /// Lists live resources of a kind within a parent scope.
    ///
    /// Destroyed resources are left out.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MalformedAddress`] when `scope` does not fit
    /// the kind's parent shape, and [`ReconcileError::Backend`] when the
    /// listing fails.
    pub async fn list(
        &self,
        descriptor: &ResourceDescriptor,
        scope: &[AddressSegment],
    ) -> Result<Vec<ObservedResource>, ReconcileError> {
        let collection = address::collection_path(scope, descriptor)?;
        let items = self.backend.list(&collection).await?;
        Ok(items
            .into_iter()
            .filter(|item| !item.destroyed)
            .map(|item| Self::observe(item, scope, descriptor))
            .collect())
    }

    /// Resolves a bare name or full path to the identity of a live resource.
    ///
    /// Bare names borrow their ancestors from `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MalformedAddress`] when the reference cannot
    /// be placed, and [`ReconcileError::NotFound`] when nothing live exists at
    /// the resolved address.
    pub async fn resolve_reference(
        &self,
        reference: &str,
        descriptor: &ResourceDescriptor,
        scope: &[AddressSegment],
    ) -> Result<ResourceHandle, ReconcileError> {
        let target = address::scoped(reference, descriptor, scope)?;
        let path = target.path();
        match self.backend.read(&path).await? {
            Some(found) if !found.destroyed => Ok(ResourceHandle {
                id: found.id,
                name: found.name,
                parent: target.parent().to_vec(),
            }),
            _ => Err(not_found(descriptor, path)),
        }
    }

    async fn resolve_field_references(
        &self,
        fields: &FieldMap,
        descriptor: &ResourceDescriptor,
        scope: &[AddressSegment],
    ) -> Result<(), ReconcileError> {
        for (name, value) in fields {
            let Some(spec) = descriptor.field(name) else {
                continue;
            };
            if let (ValueKind::Reference(target), FieldValue::Text(reference)) = (spec.value, value) {
                let handle = self
                    .resolve_reference(reference, target.descriptor(), scope)
                    .await?;
                debug!(field = %name, id = %handle.id, "resolved reference");
            }
        }
        Ok(())
    }

    async fn await_settled(
        &self,
        operation: Operation,
        fallback_path: &str,
        visibility: Visibility,
    ) -> Result<Option<ResourcePayload>, ReconcileError> {
        OperationPoller::new(&self.backend, &self.policy)
            .await_operation_until(
                operation,
                fallback_path,
                visibility,
                cancelled(self.cancellation.clone()),
            )
            .await
    }

    fn observe(
        payload: ResourcePayload,
        parent: &[AddressSegment],
        descriptor: &ResourceDescriptor,
    ) -> ObservedResource {
        ObservedResource {
            handle: ResourceHandle {
                id: payload.id,
                name: payload.name,
                parent: parent.to_vec(),
            },
            fields: descriptor.normalize_observed(payload.fields),
            destroyed: payload.destroyed,
        }
    }
}

/// Resolves once `true` is sent on the channel; never resolves without one or
/// after the sender is dropped.
async fn cancelled(receiver: Option<watch::Receiver<bool>>) {
    let mut fired = false;
    if let Some(mut cancellation) = receiver {
        fired = cancellation.wait_for(|flag| *flag).await.is_ok();
    }
    if !fired {
        std::future::pending::<()>().await;
    }
}

fn not_found(descriptor: &ResourceDescriptor, target: String) -> ReconcileError {
    ReconcileError::NotFound {
        kind: descriptor.display_name.to_owned(),
        target,
    }
}

fn submit_error(descriptor: &ResourceDescriptor, name: &str, err: BackendError) -> ReconcileError {
    match err {
        BackendError::Conflict { message } => ReconcileError::Conflict {
            kind: descriptor.display_name.to_owned(),
            name: name.to_owned(),
            message,
        },
        other => ReconcileError::Backend(other),
    }
}
