//! Create: `Absent -> Creating -> Present`.

use tracing::info;

use crate::address::ImportAddress;
use crate::backend::Backend;
use crate::copy::{self, SOURCE_LINK_FIELD, SourceLink};
use crate::descriptor::ResourceDescriptor;
use crate::error::ReconcileError;
use crate::poller::Visibility;
use crate::state::{DesiredState, FieldValue, LifecycleState, ObservedResource};

use super::{Reconciler, not_found, submit_error};

impl<B> Reconciler<B>
where
    B: Backend,
{
    /// Creates a resource and returns its post-creation state.
    ///
    /// Fields are validated and references resolved before anything is
    /// submitted. A name collision is reported as
    /// [`ReconcileError::Conflict`] and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when validation fails, a reference or copy
    /// source does not exist, the backend rejects the create, or the
    /// operation fails or does not settle.
    pub async fn create(
        &self,
        desired: &DesiredState,
        descriptor: &ResourceDescriptor,
    ) -> Result<ObservedResource, ReconcileError> {
        let target = ImportAddress::within(&desired.parent, descriptor, &desired.name)?;
        let fields = descriptor.normalize_desired(&desired.fields)?;
        let source = checked_source(desired.source.as_ref(), descriptor)?;
        let plan = copy::classify(source, false)?;
        self.resolve_field_references(&desired.fields, descriptor, &desired.parent)
            .await?;
        if let Some(link) = source {
            self.require_source(link).await?;
        }

        let mut body = fields;
        body.insert(String::from("name"), FieldValue::text(&desired.name));
        if let Some(link) = source {
            body.insert(String::from(SOURCE_LINK_FIELD), FieldValue::text(link.path()));
        }

        info!(
            kind = descriptor.kind.as_str(),
            name = %desired.name,
            state = %LifecycleState::Creating,
            plan = ?plan,
            "submitting create"
        );
        let operation = self
            .backend
            .create(&target.collection_path(), &body)
            .await
            .map_err(|err| submit_error(descriptor, &desired.name, err))?;

        let path = target.path();
        let payload = self
            .await_settled(operation, &path, Visibility::Present)
            .await?
            .ok_or_else(|| not_found(descriptor, path.clone()))?;
        let observed = Self::observe(payload, target.parent(), descriptor);
        info!(
            kind = descriptor.kind.as_str(),
            name = %observed.handle.name,
            id = %observed.handle.id,
            state = %LifecycleState::Present,
            "create settled"
        );
        Ok(observed)
    }

    pub(super) async fn require_source(&self, link: &SourceLink) -> Result<(), ReconcileError> {
        let path = link.path();
        match self.backend.read(&path).await? {
            Some(found) if !found.destroyed => Ok(()),
            _ => Err(ReconcileError::NotFound {
                kind: String::from("copy source"),
                target: path,
            }),
        }
    }
}

/// Returns the copy source when the kind accepts one.
pub(super) fn checked_source<'d>(
    source: Option<&'d SourceLink>,
    descriptor: &ResourceDescriptor,
) -> Result<Option<&'d SourceLink>, ReconcileError> {
    match source {
        Some(_) if !descriptor.supports_copy => Err(ReconcileError::InvalidCopyTarget {
            message: format!("{} does not accept a copy source", descriptor.display_name),
        }),
        other => Ok(other),
    }
}
