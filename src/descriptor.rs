//! Static per-kind resource descriptors.
//!
//! The reconciler is generic over kinds: everything that differs between a
//! tenant and a volume (address shape, field schema, delete flags, copy and
//! soft-delete support) is data held in a [`ResourceDescriptor`]. Descriptors
//! live in a static registry keyed by [`ResourceKind`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::address::reference_name;
use crate::error::ReconcileError;
use crate::state::{FieldMap, FieldValue};
use crate::units::{UnitBase, parse_quantity};

/// Resource kinds known to the engine.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    /// Global storage service (a hardware class offering).
    StorageService,
    /// Global snapshot protection policy.
    ProtectionPolicy,
    /// Global host access policy (an initiator identity).
    HostAccessPolicy,
    /// Tenant.
    Tenant,
    /// Tenant space within a tenant.
    TenantSpace,
    /// Placement group within a tenant space.
    PlacementGroup,
    /// Storage class within a storage service.
    StorageClass,
    /// Volume within a tenant space.
    Volume,
    /// Snapshot within a tenant space.
    Snapshot,
}

impl ResourceKind {
    /// Every registered kind, in registry order.
    pub const ALL: [Self; 9] = [
        Self::StorageService,
        Self::ProtectionPolicy,
        Self::HostAccessPolicy,
        Self::Tenant,
        Self::TenantSpace,
        Self::PlacementGroup,
        Self::StorageClass,
        Self::Volume,
        Self::Snapshot,
    ];

    /// Returns the kind's tag, such as `placement_group`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageService => "storage_service",
            Self::ProtectionPolicy => "protection_policy",
            Self::HostAccessPolicy => "host_access_policy",
            Self::Tenant => "tenant",
            Self::TenantSpace => "tenant_space",
            Self::PlacementGroup => "placement_group",
            Self::StorageClass => "storage_class",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
        }
    }

    /// Returns the static descriptor for this kind.
    #[must_use]
    pub const fn descriptor(self) -> &'static ResourceDescriptor {
        match self {
            Self::StorageService => &STORAGE_SERVICE,
            Self::ProtectionPolicy => &PROTECTION_POLICY,
            Self::HostAccessPolicy => &HOST_ACCESS_POLICY,
            Self::Tenant => &TENANT,
            Self::TenantSpace => &TENANT_SPACE,
            Self::PlacementGroup => &PLACEMENT_GROUP,
            Self::StorageClass => &STORAGE_CLASS,
            Self::Volume => &VOLUME,
            Self::Snapshot => &SNAPSHOT,
        }
    }

    /// Finds the kind stored under a collection label such as `volumes`.
    #[must_use]
    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.descriptor().collection == collection)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a kind name is not registered.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    /// Accepts the kind tag (`placement_group`) or its collection label
    /// (`placement-groups`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .or_else(|| Self::from_collection(value))
            .ok_or_else(|| UnknownKind(value.to_owned()))
    }
}

/// How a field participates in reconciliation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldRole {
    /// Settable at creation and by update.
    Plain,
    /// Settable at creation only; updates that change it are rejected.
    Immutable,
    /// Assigned by the backend; never accepted from the caller.
    Computed,
}

/// Value shape of a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    /// Text value.
    Text,
    /// Integer value.
    Integer,
    /// Boolean value.
    Bool,
    /// List of values.
    List,
    /// Quantity with an optional unit suffix, stored in base units.
    Quantity(UnitBase),
    /// Reference to another resource by name or path.
    Reference(ResourceKind),
}

/// Schema entry for one field of a kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    /// Field name as exchanged with the backend.
    pub name: &'static str,
    /// Reconciliation role.
    pub role: FieldRole,
    /// Value shape.
    pub value: ValueKind,
}

impl FieldSpec {
    const fn plain(name: &'static str, value: ValueKind) -> Self {
        Self {
            name,
            role: FieldRole::Plain,
            value,
        }
    }

    const fn immutable(name: &'static str, value: ValueKind) -> Self {
        Self {
            name,
            role: FieldRole::Immutable,
            value,
        }
    }

    const fn computed(name: &'static str, value: ValueKind) -> Self {
        Self {
            name,
            role: FieldRole::Computed,
            value,
        }
    }

    /// Normalises a value to the field's canonical form.
    ///
    /// Quantities become integers in base units and references become the
    /// referenced resource's name.
    ///
    /// # Errors
    ///
    /// Returns a message describing the mismatch when the value does not fit
    /// the field's shape.
    pub fn normalize(&self, value: &FieldValue) -> Result<FieldValue, String> {
        match (self.value, value) {
            (ValueKind::Quantity(base), FieldValue::Text(raw)) => {
                let amount = parse_quantity(raw, base).map_err(|err| err.to_string())?;
                i64::try_from(amount)
                    .map(FieldValue::Integer)
                    .map_err(|_| format!("quantity '{raw}' is too large"))
            }
            (ValueKind::Quantity(_), FieldValue::Integer(amount)) if *amount >= 0 => {
                Ok(FieldValue::Integer(*amount))
            }
            (ValueKind::Reference(_), FieldValue::Text(reference)) if !reference.is_empty() => {
                Ok(FieldValue::text(reference_name(reference)))
            }
            (ValueKind::Reference(_), FieldValue::Object(object)) => object
                .get("name")
                .and_then(FieldValue::as_text)
                .map(FieldValue::text)
                .ok_or_else(|| String::from("reference object has no name")),
            (ValueKind::Text, FieldValue::Text(_))
            | (ValueKind::Integer, FieldValue::Integer(_))
            | (ValueKind::Bool, FieldValue::Bool(_))
            | (ValueKind::List, FieldValue::List(_)) => Ok(value.clone()),
            (expected, other) => Err(format!("expected {}, got {other}", expected.describe())),
        }
    }
}

impl ValueKind {
    const fn describe(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "an integer",
            Self::Bool => "a boolean",
            Self::List => "a list",
            Self::Quantity(_) => "a non-negative quantity",
            Self::Reference(_) => "a resource name or path",
        }
    }
}

/// Ancestor segment required in a kind's address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParentSegment {
    /// Collection label, such as `tenant-spaces`.
    pub label: &'static str,
    /// Placeholder used in import formats, such as `tenant-space`.
    pub placeholder: &'static str,
    /// Whether bare references must find this ancestor in scope.
    pub required: bool,
}

impl ParentSegment {
    const fn required(label: &'static str, placeholder: &'static str) -> Self {
        Self {
            label,
            placeholder,
            required: true,
        }
    }
}

/// Delete-time flags a kind may accept.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DeleteFlag {
    /// Destroy snapshots that belong to the resource along with it.
    DestroySnapshots,
    /// Eradicate instead of soft-deleting.
    Eradicate,
}

impl DeleteFlag {
    /// Every flag known to the engine.
    pub const ALL: [Self; 2] = [Self::DestroySnapshots, Self::Eradicate];

    /// Returns the option name callers configure, such as
    /// `eradicate_on_delete`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DestroySnapshots => "destroy_snapshots_on_delete",
            Self::Eradicate => "eradicate_on_delete",
        }
    }

    /// Returns the query parameter sent on the delete request.
    #[must_use]
    pub const fn query_key(self) -> &'static str {
        match self {
            Self::DestroySnapshots => "destroy_snapshots",
            Self::Eradicate => "eradicate",
        }
    }
}

impl fmt::Display for DeleteFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of delete flags requested for one delete call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeleteOptions(BTreeSet<DeleteFlag>);

impl DeleteOptions {
    /// No flags.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a flag.
    #[must_use]
    pub fn with(mut self, flag: DeleteFlag) -> Self {
        self.0.insert(flag);
        self
    }

    /// Whether the flag was requested.
    #[must_use]
    pub fn contains(&self, flag: DeleteFlag) -> bool {
        self.0.contains(&flag)
    }

    /// Whether no flags were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the requested flags in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = DeleteFlag> + '_ {
        self.0.iter().copied()
    }
}

/// Static description of one resource kind.
#[derive(Debug, Eq, PartialEq)]
pub struct ResourceDescriptor {
    /// Kind tag.
    pub kind: ResourceKind,
    /// Human-readable name used in messages, such as `placement group`.
    pub display_name: &'static str,
    /// Collection label in addresses, such as `placement-groups`.
    pub collection: &'static str,
    /// Placeholder for the resource's own name in import formats.
    pub placeholder: &'static str,
    /// Ancestors, outermost first.
    pub parent_segments: &'static [ParentSegment],
    /// Field schema.
    pub fields: &'static [FieldSpec],
    /// Recognised delete flags.
    pub delete_options: &'static [DeleteFlag],
    /// Whether existing instances can be imported by address.
    pub supports_import: bool,
    /// Whether a copy source may be supplied.
    pub supports_copy: bool,
    /// Whether a delete may leave the instance in the destroyed state.
    pub soft_delete: bool,
}

impl ResourceDescriptor {
    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Names of immutable fields.
    pub fn immutable_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields
            .iter()
            .filter(|spec| spec.role == FieldRole::Immutable)
            .map(|spec| spec.name)
    }

    /// Fields the backend assigns.
    pub fn computed_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields
            .iter()
            .filter(|spec| spec.role == FieldRole::Computed)
    }

    /// Collection labels of every address segment, outermost first.
    #[must_use]
    pub fn address_labels(&self) -> Vec<&'static str> {
        self.parent_segments
            .iter()
            .map(|segment| segment.label)
            .chain(std::iter::once(self.collection))
            .collect()
    }

    /// Canonical import pattern, for example
    /// `/tenants/<tenant>/tenant-spaces/<tenant-space>/volumes/<volume>`.
    #[must_use]
    pub fn import_format(&self) -> String {
        let mut format = String::new();
        let segments = self
            .parent_segments
            .iter()
            .map(|segment| (segment.label, segment.placeholder))
            .chain(std::iter::once((self.collection, self.placeholder)));
        for (label, placeholder) in segments {
            format.push('/');
            format.push_str(label);
            format.push_str("/<");
            format.push_str(placeholder);
            format.push('>');
        }
        format
    }

    /// Validates and normalises caller-supplied fields.
    ///
    /// Null values are dropped so that omitted and cleared fields are never
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Validation`] for unknown fields, computed
    /// fields, and values that do not fit the field's shape.
    pub fn normalize_desired(&self, fields: &FieldMap) -> Result<FieldMap, ReconcileError> {
        let mut normalized = FieldMap::new();
        for (name, value) in fields {
            if *value == FieldValue::Null {
                continue;
            }
            let spec = self
                .field(name)
                .ok_or_else(|| self.validation(name, "unknown field"))?;
            if spec.role == FieldRole::Computed {
                return Err(self.validation(name, "computed by the backend and cannot be set"));
            }
            let canonical = spec
                .normalize(value)
                .map_err(|message| self.validation(name, &message))?;
            normalized.insert(name.clone(), canonical);
        }
        Ok(normalized)
    }

    /// Normalises fields reported by the backend.
    ///
    /// Unknown fields and values that fail to normalise are kept verbatim.
    #[must_use]
    pub fn normalize_observed(&self, fields: FieldMap) -> FieldMap {
        fields
            .into_iter()
            .map(|(name, value)| {
                let canonical = self
                    .field(&name)
                    .and_then(|spec| spec.normalize(&value).ok())
                    .unwrap_or(value);
                (name, canonical)
            })
            .collect()
    }

    /// Parses caller-supplied option names into flags declared by this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnsupportedDeleteOption`] for names the kind
    /// does not declare.
    pub fn parse_delete_options<'a, I>(&self, names: I) -> Result<DeleteOptions, ReconcileError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut options = DeleteOptions::new();
        for name in names {
            let flag = self
                .delete_options
                .iter()
                .copied()
                .find(|flag| flag.as_str() == name)
                .ok_or_else(|| self.unsupported_option(name))?;
            options = options.with(flag);
        }
        Ok(options)
    }

    /// Checks that every requested flag is declared by this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnsupportedDeleteOption`] for the first flag
    /// the kind does not declare.
    pub fn check_delete_options(&self, options: &DeleteOptions) -> Result<(), ReconcileError> {
        options
            .iter()
            .find(|flag| !self.delete_options.contains(flag))
            .map_or(Ok(()), |flag| Err(self.unsupported_option(flag.as_str())))
    }

    fn validation(&self, field: &str, message: &str) -> ReconcileError {
        ReconcileError::Validation {
            kind: self.display_name.to_owned(),
            field: field.to_owned(),
            message: message.to_owned(),
        }
    }

    fn unsupported_option(&self, option: &str) -> ReconcileError {
        ReconcileError::UnsupportedDeleteOption {
            kind: self.display_name.to_owned(),
            option: option.to_owned(),
        }
    }
}

const TENANT_SCOPE: [ParentSegment; 1] = [ParentSegment::required("tenants", "tenant")];

const TENANT_SPACE_SCOPE: [ParentSegment; 2] = [
    ParentSegment::required("tenants", "tenant"),
    ParentSegment::required("tenant-spaces", "tenant-space"),
];

const STORAGE_SERVICE_SCOPE: [ParentSegment; 1] =
    [ParentSegment::required("storage-services", "storage-service")];

const DISPLAY_NAME: FieldSpec = FieldSpec::plain("display_name", ValueKind::Text);

static STORAGE_SERVICE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::StorageService,
    display_name: "storage service",
    collection: "storage-services",
    placeholder: "storage-service",
    parent_segments: &[],
    fields: &[DISPLAY_NAME, FieldSpec::plain("hardware_types", ValueKind::List)],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static PROTECTION_POLICY: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::ProtectionPolicy,
    display_name: "protection policy",
    collection: "protection-policies",
    placeholder: "protection-policy",
    parent_segments: &[],
    fields: &[
        DISPLAY_NAME,
        FieldSpec::immutable("local_rpo", ValueKind::Integer),
        FieldSpec::immutable("local_retention", ValueKind::Integer),
    ],
    delete_options: &[DeleteFlag::DestroySnapshots],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static HOST_ACCESS_POLICY: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::HostAccessPolicy,
    display_name: "host access policy",
    collection: "host-access-policies",
    placeholder: "host-access-policy",
    parent_segments: &[],
    fields: &[
        DISPLAY_NAME,
        FieldSpec::immutable("iqn", ValueKind::Text),
        FieldSpec::immutable("personality", ValueKind::Text),
    ],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static TENANT: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Tenant,
    display_name: "tenant",
    collection: "tenants",
    placeholder: "tenant",
    parent_segments: &[],
    fields: &[DISPLAY_NAME],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static TENANT_SPACE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::TenantSpace,
    display_name: "tenant space",
    collection: "tenant-spaces",
    placeholder: "tenant-space",
    parent_segments: &TENANT_SCOPE,
    fields: &[DISPLAY_NAME],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static PLACEMENT_GROUP: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::PlacementGroup,
    display_name: "placement group",
    collection: "placement-groups",
    placeholder: "placement-group",
    parent_segments: &TENANT_SPACE_SCOPE,
    fields: &[
        DISPLAY_NAME,
        FieldSpec::immutable("region", ValueKind::Text),
        FieldSpec::immutable("availability_zone", ValueKind::Text),
        FieldSpec::immutable(
            "storage_service",
            ValueKind::Reference(ResourceKind::StorageService),
        ),
        FieldSpec::computed("array", ValueKind::Text),
        FieldSpec::computed("iqn", ValueKind::Text),
    ],
    delete_options: &[DeleteFlag::DestroySnapshots],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static STORAGE_CLASS: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::StorageClass,
    display_name: "storage class",
    collection: "storage-classes",
    placeholder: "storage-class",
    parent_segments: &STORAGE_SERVICE_SCOPE,
    fields: &[
        DISPLAY_NAME,
        FieldSpec::immutable("size_limit", ValueKind::Quantity(UnitBase::Binary)),
        FieldSpec::immutable("iops_limit", ValueKind::Quantity(UnitBase::Decimal)),
        FieldSpec::immutable("bandwidth_limit", ValueKind::Quantity(UnitBase::Binary)),
    ],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: false,
};

static VOLUME: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Volume,
    display_name: "volume",
    collection: "volumes",
    placeholder: "volume",
    parent_segments: &TENANT_SPACE_SCOPE,
    fields: &[
        DISPLAY_NAME,
        FieldSpec::plain("size", ValueKind::Quantity(UnitBase::Binary)),
        FieldSpec::immutable(
            "storage_class",
            ValueKind::Reference(ResourceKind::StorageClass),
        ),
        FieldSpec::plain(
            "placement_group",
            ValueKind::Reference(ResourceKind::PlacementGroup),
        ),
        FieldSpec::plain(
            "protection_policy",
            ValueKind::Reference(ResourceKind::ProtectionPolicy),
        ),
        FieldSpec::plain("host_access_policies", ValueKind::List),
        FieldSpec::computed("serial_number", ValueKind::Text),
        FieldSpec::computed("target_iscsi_iqn", ValueKind::Text),
    ],
    delete_options: &[DeleteFlag::Eradicate],
    supports_import: true,
    supports_copy: true,
    soft_delete: true,
};

static SNAPSHOT: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Snapshot,
    display_name: "snapshot",
    collection: "snapshots",
    placeholder: "snapshot",
    parent_segments: &TENANT_SPACE_SCOPE,
    fields: &[
        DISPLAY_NAME,
        FieldSpec::immutable(
            "placement_group",
            ValueKind::Reference(ResourceKind::PlacementGroup),
        ),
    ],
    delete_options: &[],
    supports_import: true,
    supports_copy: false,
    soft_delete: true,
};
