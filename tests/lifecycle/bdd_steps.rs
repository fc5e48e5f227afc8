//! BDD step definitions for lifecycle reconciliation.

use std::future::Future;

use rstest_bdd_macros::{given, then, when};
use stratum::{
    AddressSegment, DeleteOptions, DesiredState, FieldMap, FieldValue, LifecycleState,
    ObservedResource, ReconcileError,
};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, placement_group};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new()?;
    Ok(runtime.block_on(future))
}

fn created(lifecycle_context: &LifecycleContext) -> Result<ObservedResource, StepError> {
    lifecycle_context
        .created
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no placement group was created")))
}

fn desired(lifecycle_context: &LifecycleContext) -> Result<DesiredState, StepError> {
    lifecycle_context
        .desired
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("missing desired state")))
}

fn scope(tenant: &str, space: &str) -> Vec<AddressSegment> {
    vec![
        AddressSegment::new("tenants", tenant),
        AddressSegment::new("tenant-spaces", space),
    ]
}

#[given("tenant \"{tenant}\" with tenant space \"{space}\"")]
fn tenant_with_space(lifecycle_context: &LifecycleContext, tenant: String, space: String) {
    let tenant_path = format!("/tenants/{tenant}");
    lifecycle_context.backend.seed(&tenant_path, FieldMap::new());
    lifecycle_context
        .backend
        .seed(&format!("{tenant_path}/tenant-spaces/{space}"), FieldMap::new());
}

#[when("I create placement group \"{name}\" in tenant \"{tenant}\" space \"{space}\"")]
fn create_placement_group(
    lifecycle_context: &LifecycleContext,
    name: String,
    tenant: String,
    space: String,
) -> Result<(), StepError> {
    let desired = placement_group(&name, &tenant, &space);
    let observed = block_on(
        lifecycle_context
            .engine
            .create(&desired, LifecycleContext::descriptor()),
    )??;
    *lifecycle_context.desired.borrow_mut() = Some(desired);
    *lifecycle_context.created.borrow_mut() = Some(observed);
    Ok(())
}

#[when("another placement group named \"{name}\" is submitted")]
fn submit_duplicate(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let desired = DesiredState {
        name,
        ..desired(lifecycle_context)?.field("display_name", "Impostor")
    };
    let result = block_on(
        lifecycle_context
            .engine
            .create(&desired, LifecycleContext::descriptor()),
    )?;
    *lifecycle_context.failure.borrow_mut() = result.err();
    Ok(())
}

#[when("I list placement groups in tenant \"{tenant}\" space \"{space}\"")]
fn list_placement_groups(
    lifecycle_context: &LifecycleContext,
    tenant: String,
    space: String,
) -> Result<(), StepError> {
    let scope = scope(&tenant, &space);
    let listed = block_on(
        lifecycle_context
            .engine
            .list(LifecycleContext::descriptor(), &scope),
    )??;
    *lifecycle_context.listed.borrow_mut() = listed;
    Ok(())
}

#[when("I delete the placement group")]
fn delete_placement_group(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let target = created(lifecycle_context)?;
    let outcome = block_on(lifecycle_context.engine.delete(
        &target.handle,
        LifecycleContext::descriptor(),
        &DeleteOptions::new(),
    ))??;
    *lifecycle_context.deleted.borrow_mut() = Some(outcome.state());
    Ok(())
}

#[when("I rename the placement group to \"{display}\"")]
fn rename_placement_group(
    lifecycle_context: &LifecycleContext,
    display: String,
) -> Result<(), StepError> {
    let observed = created(lifecycle_context)?;
    let desired = desired(lifecycle_context)?
        .field("display_name", display);
    let updated = block_on(lifecycle_context.engine.update(
        &observed.handle,
        &desired,
        &observed,
        LifecycleContext::descriptor(),
    ))??;
    *lifecycle_context.updated.borrow_mut() = Some(updated);
    Ok(())
}

#[when("I move the placement group to region \"{region}\"")]
fn move_placement_group(
    lifecycle_context: &LifecycleContext,
    region: String,
) -> Result<(), StepError> {
    let observed = created(lifecycle_context)?;
    let desired = desired(lifecycle_context)?
        .field("region", region);
    lifecycle_context.backend.clear_calls();
    let result = block_on(lifecycle_context.engine.update(
        &observed.handle,
        &desired,
        &observed,
        LifecycleContext::descriptor(),
    ))?;
    *lifecycle_context.failure.borrow_mut() = result.err();
    Ok(())
}

#[then("the listing has \"{count}\" entries")]
fn listing_has_entries(lifecycle_context: &LifecycleContext, count: usize) -> Result<(), StepError> {
    let listed = lifecycle_context.listed.borrow().len();
    if listed == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} listed entries, got {listed}"
        )))
    }
}

#[then("the listed placement group matches the created one")]
fn listed_matches_created(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let expected = created(lifecycle_context)?;
    let listed = lifecycle_context.listed.borrow();
    let entry = listed
        .first()
        .ok_or_else(|| StepError::Assertion(String::from("listing is empty")))?;
    if *entry == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "listed {entry:?} does not match created {expected:?}"
        )))
    }
}

#[then("the last delete reports the resource as absent")]
fn last_delete_absent(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match *lifecycle_context.deleted.borrow() {
        Some(LifecycleState::Absent) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected absent after delete, got {other:?}"
        ))),
    }
}

#[then("reading the placement group shows display name \"{display}\"")]
fn read_shows_display_name(
    lifecycle_context: &LifecycleContext,
    display: String,
) -> Result<(), StepError> {
    let target = created(lifecycle_context)?;
    let outcome = block_on(
        lifecycle_context
            .engine
            .read(&target.handle, LifecycleContext::descriptor()),
    )??;
    let observed = outcome
        .into_observed()
        .ok_or_else(|| StepError::Assertion(String::from("placement group is absent")))?;
    let expected = FieldValue::text(display);
    if observed.fields.get("display_name") == Some(&expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected display_name {expected}, got {:?}",
            observed.fields.get("display_name")
        )))
    }
}

#[then("the placement group id is unchanged")]
fn id_unchanged(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let original = created(lifecycle_context)?;
    let updated = lifecycle_context
        .updated
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no update recorded")))?;
    if updated.handle.id == original.handle.id {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "id changed from {} to {}",
            original.handle.id, updated.handle.id
        )))
    }
}

#[then("the update is rejected as an immutable field violation")]
fn update_rejected(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &*lifecycle_context.failure.borrow() {
        Some(ReconcileError::ImmutableFieldViolation { violations, .. })
            if violations.iter().any(|violation| violation.field == "region") =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected immutable violation on region, got {other:?}"
        ))),
    }
}

#[then("no backend calls were made for the update")]
fn no_backend_calls(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let calls = lifecycle_context.backend.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no backend calls, got {calls:?}"
        )))
    }
}

#[then("the create is rejected as a conflict")]
fn create_conflicts(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &*lifecycle_context.failure.borrow() {
        Some(ReconcileError::Conflict { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected conflict, got {other:?}"
        ))),
    }
}

#[then("the original placement group is intact")]
fn original_intact(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let original = created(lifecycle_context)?;
    let outcome = block_on(
        lifecycle_context
            .engine
            .read(&original.handle, LifecycleContext::descriptor()),
    )??;
    match outcome.into_observed() {
        Some(current) if current == original => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected original {original:?}, got {other:?}"
        ))),
    }
}
