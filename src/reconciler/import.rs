//! Import an existing resource by address.

use tracing::info;

use crate::address::{self, ResourceHandle};
use crate::backend::Backend;
use crate::descriptor::ResourceDescriptor;
use crate::error::ReconcileError;
use crate::state::ObservedResource;

use super::{Reconciler, not_found};

impl<B> Reconciler<B>
where
    B: Backend,
{
    /// Decodes `path`, resolves it to a handle, and reads the resource.
    ///
    /// Delete-time flags are never part of imported state. A soft-deleted
    /// resource is returned with `destroyed` set.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ImportNotSupported`] for kinds without
    /// import, [`ReconcileError::MalformedAddress`] when the path does not
    /// match the kind's shape, and [`ReconcileError::NotFound`] when nothing
    /// exists at the address.
    pub async fn import(
        &self,
        path: &str,
        descriptor: &ResourceDescriptor,
    ) -> Result<ObservedResource, ReconcileError> {
        if !descriptor.supports_import {
            return Err(ReconcileError::ImportNotSupported {
                kind: descriptor.display_name.to_owned(),
            });
        }
        let target = address::decode(path, descriptor)?;
        let found = self
            .backend
            .read(&target.path())
            .await?
            .ok_or_else(|| not_found(descriptor, path.to_owned()))?;
        let handle = ResourceHandle {
            id: found.id,
            name: found.name,
            parent: target.parent().to_vec(),
        };

        let observed = self
            .read(&handle, descriptor)
            .await?
            .into_observed()
            .ok_or_else(|| not_found(descriptor, path.to_owned()))?;
        info!(
            kind = descriptor.kind.as_str(),
            name = %observed.handle.name,
            id = %observed.handle.id,
            destroyed = observed.destroyed,
            "imported resource"
        );
        Ok(observed)
    }
}
