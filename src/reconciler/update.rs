//! Update: `Present -> Updating -> Present`.

use tracing::{debug, info};

use crate::address::{ImportAddress, ResourceHandle};
use crate::backend::{Backend, BackendError};
use crate::copy::{self, CopyPlan, SOURCE_LINK_FIELD};
use crate::descriptor::ResourceDescriptor;
use crate::error::ReconcileError;
use crate::guard;
use crate::poller::Visibility;
use crate::state::{DesiredState, FieldMap, FieldValue, LifecycleState, ObservedResource};

use super::create::checked_source;
use super::{Reconciler, not_found, submit_error};

impl<B> Reconciler<B>
where
    B: Backend,
{
    /// Applies the difference between `desired` and `observed`.
    ///
    /// The immutability guard runs first and rejects the update without
    /// contacting the backend. Only changed fields are sent, and a volume
    /// copy source is sent only when it differs from the one the backend
    /// recorded; when nothing changed, `observed` is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ImmutableFieldViolation`] when an immutable
    /// field would change, [`ReconcileError::InvalidCopyTarget`] for a
    /// snapshot source, and the submission and polling errors of
    /// [`Reconciler::create`].
    pub async fn update(
        &self,
        handle: &ResourceHandle,
        desired: &DesiredState,
        observed: &ObservedResource,
        descriptor: &ResourceDescriptor,
    ) -> Result<ObservedResource, ReconcileError> {
        let target = ImportAddress::for_handle(handle, descriptor)?;
        let fields = descriptor.normalize_desired(&desired.fields)?;
        let violations = guard::validate(&fields, observed, descriptor);
        if !violations.is_empty() {
            return Err(ReconcileError::ImmutableFieldViolation {
                kind: descriptor.display_name.to_owned(),
                violations,
            });
        }
        let source = checked_source(desired.source.as_ref(), descriptor)?;
        let plan = copy::classify(source, true)?;

        let mut patch = changed_fields(fields, &observed.fields);
        self.resolve_field_references(&patch, descriptor, &handle.parent)
            .await?;
        let refresh = source.filter(|link| {
            plan == CopyPlan::CopyFromVolume && !link.is_recorded_in(&observed.fields)
        });
        if let Some(link) = refresh {
            self.require_source(link).await?;
            patch.insert(String::from(SOURCE_LINK_FIELD), FieldValue::text(link.path()));
        }
        if patch.is_empty() {
            debug!(
                kind = descriptor.kind.as_str(),
                name = %handle.name,
                "no changes to apply"
            );
            return Ok(observed.clone());
        }

        let path = target.path();
        info!(
            kind = descriptor.kind.as_str(),
            name = %handle.name,
            state = %LifecycleState::Updating,
            fields = ?patch.keys().collect::<Vec<_>>(),
            "submitting update"
        );
        let operation = self
            .backend
            .update(&path, &patch)
            .await
            .map_err(|err| match err {
                BackendError::NotFound { .. } => not_found(descriptor, path.clone()),
                other => submit_error(descriptor, &handle.name, other),
            })?;

        let payload = self
            .await_settled(operation, &path, Visibility::Present)
            .await?
            .ok_or_else(|| not_found(descriptor, path.clone()))?;
        let updated = Self::observe(payload, &handle.parent, descriptor);
        info!(
            kind = descriptor.kind.as_str(),
            name = %updated.handle.name,
            id = %updated.handle.id,
            state = %LifecycleState::Present,
            "update settled"
        );
        Ok(updated)
    }
}

/// Fields of `desired` whose normalised value differs from `observed`.
fn changed_fields(desired: FieldMap, observed: &FieldMap) -> FieldMap {
    desired
        .into_iter()
        .filter(|(name, value)| observed.get(name) != Some(value))
        .collect()
}
