//! Copy sources for volume creation and refresh.
//!
//! A volume may be created from another volume or restored from a volume
//! snapshot. Only a volume copy may be applied to a volume that already
//! exists; restoring a snapshot over an existing volume is rejected.

use crate::error::ReconcileError;
use crate::state::{FieldMap, FieldValue};

/// Field carrying a copy source in create and update bodies.
pub const SOURCE_LINK_FIELD: &str = "source_link";

/// Field in which the backend reports the path a volume was last populated
/// from.
pub const RECORDED_SOURCE_FIELD: &str = "source";

/// Where a new volume's contents come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceLink {
    /// Copy the contents of an existing volume.
    Volume {
        /// Tenant holding the source volume.
        tenant: String,
        /// Tenant space holding the source volume.
        tenant_space: String,
        /// Source volume name.
        volume: String,
    },
    /// Restore one volume snapshot of a snapshot.
    Snapshot {
        /// Tenant holding the snapshot.
        tenant: String,
        /// Tenant space holding the snapshot.
        tenant_space: String,
        /// Snapshot name.
        snapshot: String,
        /// Volume snapshot within the snapshot.
        volume_snapshot: String,
    },
}

impl SourceLink {
    /// Builds a volume copy source.
    #[must_use]
    pub fn volume(
        tenant: impl Into<String>,
        tenant_space: impl Into<String>,
        volume: impl Into<String>,
    ) -> Self {
        Self::Volume {
            tenant: tenant.into(),
            tenant_space: tenant_space.into(),
            volume: volume.into(),
        }
    }

    /// Builds a snapshot restore source.
    #[must_use]
    pub fn snapshot(
        tenant: impl Into<String>,
        tenant_space: impl Into<String>,
        snapshot: impl Into<String>,
        volume_snapshot: impl Into<String>,
    ) -> Self {
        Self::Snapshot {
            tenant: tenant.into(),
            tenant_space: tenant_space.into(),
            snapshot: snapshot.into(),
            volume_snapshot: volume_snapshot.into(),
        }
    }

    /// Path of the source in the backend, sent as the `source_link` field and
    /// read to confirm the source exists.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Volume {
                tenant,
                tenant_space,
                volume,
            } => format!("/tenants/{tenant}/tenant-spaces/{tenant_space}/volumes/{volume}"),
            Self::Snapshot {
                tenant,
                tenant_space,
                snapshot,
                volume_snapshot,
            } => format!(
                "/tenants/{tenant}/tenant-spaces/{tenant_space}/snapshots/{snapshot}/volume-snapshots/{volume_snapshot}"
            ),
        }
    }

    /// Whether `fields` record this link as the source the resource was last
    /// populated from.
    #[must_use]
    pub fn is_recorded_in(&self, fields: &FieldMap) -> bool {
        fields
            .get(RECORDED_SOURCE_FIELD)
            .and_then(FieldValue::as_text)
            .is_some_and(|recorded| recorded == self.path())
    }
}

/// Loose copy-source settings as supplied in configuration.
///
/// [`SourceLinkParts::into_link`] turns them into at most one
/// [`SourceLink`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourceLinkParts {
    /// Tenant of the source.
    pub tenant: Option<String>,
    /// Tenant space of the source.
    pub tenant_space: Option<String>,
    /// Source volume name.
    pub volume: Option<String>,
    /// Source snapshot name.
    pub snapshot: Option<String>,
    /// Source volume snapshot name.
    pub volume_snapshot: Option<String>,
}

impl SourceLinkParts {
    /// Validates the settings and builds the link, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidSourceLink`] when both a volume and a
    /// snapshot are named, or when a required part is missing.
    pub fn into_link(self) -> Result<Option<SourceLink>, ReconcileError> {
        let Self {
            tenant,
            tenant_space,
            volume,
            snapshot,
            volume_snapshot,
        } = self;
        let is_snapshot = snapshot.is_some() || volume_snapshot.is_some();
        match (volume, is_snapshot) {
            (None, false) if tenant.is_none() && tenant_space.is_none() => Ok(None),
            (None, false) => Err(invalid("a source link must name a volume or a snapshot")),
            (Some(_), true) => Err(invalid(
                "a source link may name a volume or a snapshot, not both",
            )),
            (Some(source_volume), false) => Ok(Some(SourceLink::Volume {
                tenant: required(tenant, "tenant")?,
                tenant_space: required(tenant_space, "tenant_space")?,
                volume: required(Some(source_volume), "volume")?,
            })),
            (None, true) => Ok(Some(SourceLink::Snapshot {
                tenant: required(tenant, "tenant")?,
                tenant_space: required(tenant_space, "tenant_space")?,
                snapshot: required(snapshot, "snapshot")?,
                volume_snapshot: required(volume_snapshot, "volume_snapshot")?,
            })),
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ReconcileError> {
    value
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| invalid(&format!("missing {name}")))
}

fn invalid(message: &str) -> ReconcileError {
    ReconcileError::InvalidSourceLink {
        message: message.to_owned(),
    }
}

/// How a create or update request uses its copy source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyPlan {
    /// No source; create an empty resource.
    PlainCreate,
    /// Copy from a volume. Legal on create and on update.
    CopyFromVolume,
    /// Restore from a snapshot. Legal on create only.
    CopyFromSnapshot,
}

/// Classifies a request's copy source.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidCopyTarget`] when a snapshot restore
/// targets a resource that already exists.
pub fn classify(
    source: Option<&SourceLink>,
    target_exists: bool,
) -> Result<CopyPlan, ReconcileError> {
    match source {
        None => Ok(CopyPlan::PlainCreate),
        Some(SourceLink::Volume { .. }) => Ok(CopyPlan::CopyFromVolume),
        Some(SourceLink::Snapshot { .. }) if target_exists => {
            Err(ReconcileError::InvalidCopyTarget {
                message: String::from("cannot copy snapshot to existing volume"),
            })
        }
        Some(SourceLink::Snapshot { .. }) => Ok(CopyPlan::CopyFromSnapshot),
    }
}
