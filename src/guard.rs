//! Pre-flight check that rejects updates to immutable fields.

use std::fmt;

use crate::descriptor::ResourceDescriptor;
use crate::state::{FieldMap, FieldValue, ObservedResource};

/// One immutable field whose desired value differs from the stored one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldViolation {
    /// Field name.
    pub field: String,
    /// Value currently stored by the backend.
    pub observed: FieldValue,
    /// Value the caller asked for.
    pub desired: FieldValue,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}' is immutable (observed {}, desired {})",
            self.field, self.observed, self.desired
        )
    }
}

/// Compares normalised desired fields with observed state.
///
/// Only immutable fields present on both sides are compared; values are
/// normalised first so `"1G"` equals `1073741824` and a reference path equals
/// the bare name. Computed fields are never compared.
#[must_use]
pub fn validate(
    desired: &FieldMap,
    observed: &ObservedResource,
    descriptor: &ResourceDescriptor,
) -> Vec<FieldViolation> {
    descriptor
        .immutable_fields()
        .filter_map(|name| {
            let spec = descriptor.field(name)?;
            let desired_raw = desired.get(name)?;
            let observed_raw = observed.fields.get(name)?;
            let wanted = spec
                .normalize(desired_raw)
                .unwrap_or_else(|_| desired_raw.clone());
            let stored = spec
                .normalize(observed_raw)
                .unwrap_or_else(|_| observed_raw.clone());
            (wanted != stored).then(|| FieldViolation {
                field: name.to_owned(),
                observed: stored,
                desired: wanted,
            })
        })
        .collect()
}
