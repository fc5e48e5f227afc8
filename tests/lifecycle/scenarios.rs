//! BDD scenarios for lifecycle reconciliation.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "List a created placement group and delete it"
)]
fn scenario_list_and_delete(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Deleting an already deleted placement group succeeds"
)]
fn scenario_double_delete(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Renaming a placement group keeps its identity"
)]
fn scenario_rename(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Changing an immutable field is rejected before any call"
)]
fn scenario_immutable_change(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Creating a duplicate name conflicts and keeps the original"
)]
fn scenario_duplicate_name(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
