//! Core library for the Stratum storage-orchestration provider.
//!
//! The crate exposes a single generic lifecycle engine ([`Reconciler`]) that
//! drives every resource kind through create, read, update, delete and
//! import against an asynchronous, eventually consistent backend. Kinds are
//! described declaratively by [`ResourceDescriptor`]s; the engine never
//! branches on a concrete kind.

pub mod address;
pub mod backend;
pub mod config;
pub mod copy;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod poller;
pub mod reconciler;
pub mod rest;
pub mod state;
pub mod test_support;
pub mod units;

pub use address::{AddressError, AddressSegment, ImportAddress, ResourceHandle};
pub use backend::{
    Backend, BackendError, BackendFuture, Operation, OperationStatus, ResourcePayload,
};
pub use config::{ConfigError, ProviderConfig};
pub use copy::{CopyPlan, SourceLink, SourceLinkParts};
pub use descriptor::{
    DeleteFlag, DeleteOptions, FieldRole, FieldSpec, ResourceDescriptor, ResourceKind, UnknownKind,
    ValueKind,
};
pub use error::ReconcileError;
pub use guard::FieldViolation;
pub use poller::{OperationPoller, PollPolicy, Visibility};
pub use reconciler::Reconciler;
pub use rest::RestBackend;
pub use state::{
    DeleteOutcome, DesiredState, FieldMap, FieldValue, LifecycleState, ObservedResource,
    ReadOutcome,
};
pub use units::{QuantityError, UnitBase, parse_quantity};
