//! Shared fixtures for lifecycle BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use rstest::fixture;
use stratum::test_support::InMemoryBackend;
use stratum::{
    DesiredState, LifecycleState, ObservedResource, PollPolicy, ReconcileError, Reconciler,
    ResourceDescriptor, ResourceKind,
};

pub struct LifecycleContext {
    pub backend: InMemoryBackend,
    pub engine: Reconciler<InMemoryBackend>,
    pub desired: RefCell<Option<DesiredState>>,
    pub created: RefCell<Option<ObservedResource>>,
    pub updated: RefCell<Option<ObservedResource>>,
    pub listed: RefCell<Vec<ObservedResource>>,
    pub deleted: RefCell<Option<LifecycleState>>,
    pub failure: RefCell<Option<ReconcileError>>,
}

impl LifecycleContext {
    pub fn descriptor() -> &'static ResourceDescriptor {
        ResourceKind::PlacementGroup.descriptor()
    }
}

pub fn placement_group(name: &str, tenant: &str, space: &str) -> DesiredState {
    DesiredState::new(name)
        .within("tenants", tenant)
        .within("tenant-spaces", space)
        .field("display_name", "Datastore")
        .field("region", "eu-west")
        .field("availability_zone", "eu-west-a")
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let backend = InMemoryBackend::new();
    let policy = PollPolicy::fixed(Duration::from_millis(1), 50);
    LifecycleContext {
        engine: Reconciler::new(backend.clone(), policy),
        backend,
        desired: RefCell::new(None),
        created: RefCell::new(None),
        updated: RefCell::new(None),
        listed: RefCell::new(Vec::new()),
        deleted: RefCell::new(None),
        failure: RefCell::new(None),
    }
}
