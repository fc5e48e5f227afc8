//! Hierarchical resource addresses.
//!
//! Every resource lives at a slash-delimited path made of alternating
//! collection labels and values, for example
//! `/tenants/t1/tenant-spaces/s1/placement-groups/pg1`. Import strings use the
//! same format, so the codec here serves both import and reference resolution.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::descriptor::ResourceDescriptor;

/// One `label/value` pair of an address.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct AddressSegment {
    /// Collection label such as `tenant-spaces`.
    pub label: String,
    /// Name within that collection.
    pub value: String,
}

impl AddressSegment {
    /// Creates a segment.
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Canonical identity of a live resource instance.
///
/// `id` is assigned by the backend once and never changes. `name` is assigned
/// by the user and may be known (and referenced) before the `id` is; an empty
/// `id` means the identity has not been resolved yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ResourceHandle {
    /// Backend-assigned opaque identifier.
    pub id: String,
    /// User-assigned name, unique within the parent scope.
    pub name: String,
    /// Resolved ancestor segments, outermost first.
    pub parent: Vec<AddressSegment>,
}

impl ResourceHandle {
    /// Builds a handle known only by name and scope.
    #[must_use]
    pub fn unresolved(name: impl Into<String>, parent: Vec<AddressSegment>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            parent,
        }
    }
}

/// Errors raised by the address codec.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AddressError {
    /// Raised when a path does not match the shape expected for a kind.
    #[error("invalid {kind} import path. Expected path in format '{expected}'")]
    Malformed {
        /// Human-readable kind name, such as `placement group`.
        kind: String,
        /// Canonical pattern for the kind.
        expected: String,
    },
    /// Raised when a bare reference cannot be placed in the available scope.
    #[error("cannot resolve {kind} reference '{reference}' from the current scope; use the full path '{expected}'")]
    UnscopedReference {
        /// Human-readable kind name of the referenced resource.
        kind: String,
        /// Reference as supplied by the caller.
        reference: String,
        /// Canonical pattern for the referenced kind.
        expected: String,
    },
}

impl AddressError {
    fn malformed(descriptor: &ResourceDescriptor) -> Self {
        Self::Malformed {
            kind: descriptor.display_name.to_owned(),
            expected: descriptor.import_format(),
        }
    }
}

/// Decoded address: ancestor segments followed by the resource's own
/// collection and name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportAddress {
    segments: Vec<AddressSegment>,
}

impl ImportAddress {
    /// Builds the address of `name` within `parent` for the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::Malformed`] when the scope does not match the
    /// kind's parent shape or a value is blank or contains `/`.
    pub fn within(
        parent: &[AddressSegment],
        descriptor: &ResourceDescriptor,
        name: &str,
    ) -> Result<Self, AddressError> {
        check_scope(parent, descriptor)?;
        if !is_valid_value(name) {
            return Err(AddressError::malformed(descriptor));
        }
        let mut segments = Vec::with_capacity(parent.len() + 1);
        segments.extend_from_slice(parent);
        segments.push(AddressSegment::new(descriptor.collection, name));
        Ok(Self { segments })
    }

    /// Returns the address a handle occupies for the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::Malformed`] when the handle's scope does not
    /// match the kind's parent shape.
    pub fn for_handle(
        handle: &ResourceHandle,
        descriptor: &ResourceDescriptor,
    ) -> Result<Self, AddressError> {
        Self::within(&handle.parent, descriptor, &handle.name)
    }

    /// All segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[AddressSegment] {
        &self.segments
    }

    /// Ancestor segments, excluding the resource itself.
    #[must_use]
    pub fn parent(&self) -> &[AddressSegment] {
        self.segments
            .split_last()
            .map_or(&[][..], |(_, parent)| parent)
    }

    /// The resource's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map_or("", |segment| segment.value.as_str())
    }

    /// Full path, for example `/tenants/t1/tenant-spaces/s1`.
    #[must_use]
    pub fn path(&self) -> String {
        render(&self.segments)
    }

    /// Path of the collection holding the resource, for example
    /// `/tenants/t1/tenant-spaces`.
    #[must_use]
    pub fn collection_path(&self) -> String {
        let mut path = render(self.parent());
        if let Some(last) = self.segments.last() {
            path.push('/');
            path.push_str(&last.label);
        }
        path
    }
}

impl fmt::Display for ImportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Decodes an import path against a kind's expected shape.
///
/// The path must start with `/`, contain exactly `2 * parents + 2` tokens and
/// carry the expected labels (compared case-sensitively) in order.
///
/// # Errors
///
/// Returns [`AddressError::Malformed`] with the canonical pattern for the kind
/// when the shape does not match.
pub fn decode(path: &str, descriptor: &ResourceDescriptor) -> Result<ImportAddress, AddressError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| AddressError::malformed(descriptor))?;
    let tokens = rest.split('/').collect::<Vec<_>>();
    let labels = descriptor.address_labels();
    if tokens.len() != labels.len() * 2 {
        return Err(AddressError::malformed(descriptor));
    }

    let mut segments = Vec::with_capacity(labels.len());
    for (pair, expected) in tokens.chunks_exact(2).zip(labels) {
        let [label, value] = pair else {
            return Err(AddressError::malformed(descriptor));
        };
        if *label != expected || value.is_empty() {
            return Err(AddressError::malformed(descriptor));
        }
        segments.push(AddressSegment::new(*label, *value));
    }
    Ok(ImportAddress { segments })
}

/// Encodes a handle as the path it occupies for the given kind.
///
/// # Errors
///
/// Returns [`AddressError::Malformed`] when the handle's scope does not match
/// the kind's parent shape.
pub fn encode(handle: &ResourceHandle, descriptor: &ResourceDescriptor) -> Result<String, AddressError> {
    ImportAddress::for_handle(handle, descriptor).map(|address| address.path())
}

/// Returns the path of the collection holding the kind's resources within
/// `parent`, for example `/tenants/t1/tenant-spaces/s1/volumes`.
///
/// # Errors
///
/// Returns [`AddressError::Malformed`] when `parent` does not match the
/// kind's parent shape.
pub fn collection_path(
    parent: &[AddressSegment],
    descriptor: &ResourceDescriptor,
) -> Result<String, AddressError> {
    check_scope(parent, descriptor)?;
    let mut path = render(parent);
    path.push('/');
    path.push_str(descriptor.collection);
    Ok(path)
}

/// Places a reference (bare name or full path) into an address for the target
/// kind.
///
/// Full paths are decoded directly. Bare names borrow each of the target's
/// ancestors from `scope` by label; required ancestors missing from the scope
/// make the reference unresolvable, optional ones are skipped.
///
/// # Errors
///
/// Returns [`AddressError`] when a full path is malformed or a bare name
/// cannot be placed in the scope.
pub fn scoped(
    reference: &str,
    descriptor: &ResourceDescriptor,
    scope: &[AddressSegment],
) -> Result<ImportAddress, AddressError> {
    if reference.contains('/') {
        return decode(reference, descriptor);
    }
    if reference.is_empty() {
        return Err(AddressError::malformed(descriptor));
    }

    let mut segments = Vec::with_capacity(descriptor.parent_segments.len() + 1);
    for expected in descriptor.parent_segments {
        match scope.iter().find(|segment| segment.label == expected.label) {
            Some(segment) => segments.push(segment.clone()),
            None if expected.required => {
                return Err(AddressError::UnscopedReference {
                    kind: descriptor.display_name.to_owned(),
                    reference: reference.to_owned(),
                    expected: descriptor.import_format(),
                });
            }
            None => {}
        }
    }
    segments.push(AddressSegment::new(descriptor.collection, reference));
    Ok(ImportAddress { segments })
}

/// Returns the trailing name of a reference given as a bare name or a path.
#[must_use]
pub fn reference_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

fn check_scope(parent: &[AddressSegment], descriptor: &ResourceDescriptor) -> Result<(), AddressError> {
    let matches = parent.len() == descriptor.parent_segments.len()
        && parent
            .iter()
            .zip(descriptor.parent_segments)
            .all(|(segment, expected)| segment.label == expected.label && is_valid_value(&segment.value));
    if matches {
        Ok(())
    } else {
        Err(AddressError::malformed(descriptor))
    }
}

fn is_valid_value(value: &str) -> bool {
    !value.is_empty() && !value.contains('/')
}

fn render(segments: &[AddressSegment]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(&segment.label);
        path.push('/');
        path.push_str(&segment.value);
    }
    path
}
