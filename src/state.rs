//! Desired and observed resource state.
//!
//! Both sides are plain field mappings. Values are loosely typed on the wire
//! and normalised against the kind's field schema before they are compared
//! (see [`crate::descriptor::ResourceDescriptor::normalize_desired`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{AddressSegment, ResourceHandle};
use crate::copy::SourceLink;

/// Field name to value mapping used for desired state, observed state and
/// request bodies.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single field value as exchanged with the backend.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer, including normalised quantities.
    Integer(i64),
    /// Any other JSON number, such as a fraction or an integer beyond the
    /// signed 64-bit range.
    Number(serde_json::Number),
    /// Free-form text, names, and unparsed quantities.
    Text(String),
    /// Ordered list of values.
    List(Vec<FieldValue>),
    /// Nested object, typically a reference returned by the backend.
    Object(BTreeMap<String, FieldValue>),
    /// Explicit null.
    Null,
}

impl FieldValue {
    /// Builds a text value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Builds a list of text values.
    #[must_use]
    pub fn texts<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(|value| Self::Text(value.into())).collect())
    }

    /// Returns the text content when the value is [`FieldValue::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (index, (key, value)) in map.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Null => f.write_str("null"),
        }
    }
}

/// What the caller wants a resource instance to look like.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DesiredState {
    /// User-assigned name, unique within the parent scope.
    pub name: String,
    /// Ancestor scope, outermost first (for example tenant then tenant space).
    pub parent: Vec<AddressSegment>,
    /// Configured fields. References may be bare names or full paths.
    pub fields: FieldMap,
    /// Optional copy source used at creation (or as a volume refresh).
    pub source: Option<SourceLink>,
}

impl DesiredState {
    /// Starts a desired state for a resource called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends an ancestor segment such as `("tenants", "t1")`.
    #[must_use]
    pub fn within(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.parent.push(AddressSegment::new(label, value));
        self
    }

    /// Sets a field value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the copy source.
    #[must_use]
    pub fn source(mut self, link: SourceLink) -> Self {
        self.source = Some(link);
        self
    }
}

/// What the backend reports for a live resource instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ObservedResource {
    /// Canonical identity.
    pub handle: ResourceHandle,
    /// Normalised fields, including computed ones.
    pub fields: FieldMap,
    /// Whether the backend retains the resource in a soft-deleted state.
    pub destroyed: bool,
}

/// Lifecycle states a resource instance moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// The backend has no record of the resource (404).
    Absent,
    /// A create operation is in flight.
    Creating,
    /// The resource exists and is live.
    Present,
    /// An update operation is in flight.
    Updating,
    /// A delete operation is in flight.
    Deleting,
    /// The resource is soft-deleted and retained until eradicated.
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Present => "present",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Result of reading a resource by identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// The resource is live.
    Present(ObservedResource),
    /// The resource is soft-deleted but still reported by the backend.
    Destroyed(ObservedResource),
    /// The backend answered 404.
    Absent,
}

impl ReadOutcome {
    /// Returns the lifecycle state this outcome represents.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        match self {
            Self::Present(_) => LifecycleState::Present,
            Self::Destroyed(_) => LifecycleState::Destroyed,
            Self::Absent => LifecycleState::Absent,
        }
    }

    /// Returns the observed resource for present and destroyed outcomes.
    #[must_use]
    pub fn into_observed(self) -> Option<ObservedResource> {
        match self {
            Self::Present(observed) | Self::Destroyed(observed) => Some(observed),
            Self::Absent => None,
        }
    }
}

/// Terminal state reached by a delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The resource is gone (verified by 404).
    Absent,
    /// The resource is soft-deleted and retained by the backend.
    Destroyed(ObservedResource),
}

impl DeleteOutcome {
    /// Returns the lifecycle state this outcome represents.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        match self {
            Self::Absent => LifecycleState::Absent,
            Self::Destroyed(_) => LifecycleState::Destroyed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn field_values_decode_from_backend_json() {
        let json = r#"{"size":1024,"display_name":"Vol","tags":["a"],"storage_class":{"name":"sc"},"note":null,"shared":true}"#;
        let fields: FieldMap = serde_json::from_str(json).expect("payload decodes");
        assert_eq!(fields.get("size"), Some(&FieldValue::Integer(1024)));
        assert_eq!(fields.get("display_name"), Some(&FieldValue::text("Vol")));
        assert_eq!(fields.get("tags"), Some(&FieldValue::texts(["a"])));
        assert_eq!(fields.get("note"), Some(&FieldValue::Null));
        assert_eq!(fields.get("shared"), Some(&FieldValue::Bool(true)));
        assert!(matches!(fields.get("storage_class"), Some(FieldValue::Object(_))));
    }

    #[rstest]
    fn display_renders_nested_values() {
        let value = FieldValue::List(vec![FieldValue::text("a"), FieldValue::Integer(2)]);
        assert_eq!(value.to_string(), "['a', 2]");
    }

    #[rstest]
    fn desired_state_builder_collects_scope_and_fields() {
        let desired = DesiredState::new("pg1")
            .within("tenants", "t1")
            .within("tenant-spaces", "s1")
            .field("display_name", "PG one");
        assert_eq!(desired.parent.len(), 2);
        assert_eq!(
            desired.fields.get("display_name"),
            Some(&FieldValue::text("PG one"))
        );
    }
}
