//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::backend::{
    Backend, BackendError, BackendFuture, Operation, OperationStatus, ResourcePayload,
};
use crate::copy::{RECORDED_SOURCE_FIELD, SOURCE_LINK_FIELD};
use crate::descriptor::{DeleteFlag, DeleteOptions, ResourceKind};
use crate::state::{FieldMap, FieldValue};

const DEFAULT_POLLS_TO_SETTLE: u32 = 2;

/// Records a single call made against [`InMemoryBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// Read by path.
    Read(String),
    /// Read by identifier.
    ReadById(String),
    /// Collection listing.
    List(String),
    /// Create submitted into a collection.
    Create(String),
    /// Update submitted for a path.
    Update(String),
    /// Delete submitted for a path with the given flags.
    Delete {
        /// Resource path.
        path: String,
        /// Flags sent with the delete.
        flags: Vec<DeleteFlag>,
    },
    /// Operation poll.
    Operation(String),
}

impl BackendCall {
    /// Whether the call mutates backend state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create(_) | Self::Update(_) | Self::Delete { .. }
        )
    }
}

#[derive(Clone, Debug)]
enum Effect {
    Create { path: String, payload: ResourcePayload },
    Update { path: String, patch: FieldMap },
    Delete { path: String, options: DeleteOptions },
}

#[derive(Clone, Debug)]
struct PendingOperation {
    operation: Operation,
    polls_remaining: u32,
    effect: Effect,
    failure: Option<String>,
}

#[derive(Debug)]
struct Store {
    next_id: u64,
    resources: BTreeMap<String, ResourcePayload>,
    operations: BTreeMap<String, PendingOperation>,
    calls: Vec<BackendCall>,
    polls_to_settle: u32,
    fail_next: Option<String>,
    stalled: bool,
    hidden_reads: u32,
    failing_reads: u32,
    failing_polls: u32,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            next_id: 0,
            resources: BTreeMap::new(),
            operations: BTreeMap::new(),
            calls: Vec::new(),
            polls_to_settle: DEFAULT_POLLS_TO_SETTLE,
            fail_next: None,
            stalled: false,
            hidden_reads: 0,
            failing_reads: 0,
            failing_polls: 0,
        }
    }
}

impl Store {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{prefix}-{}", self.next_id)
    }

    fn hide_read(&mut self) -> bool {
        if self.hidden_reads == 0 {
            return false;
        }
        self.hidden_reads = self.hidden_reads.saturating_sub(1);
        true
    }

    fn fail_read(&mut self) -> Result<(), BackendError> {
        if self.failing_reads == 0 {
            return Ok(());
        }
        self.failing_reads = self.failing_reads.saturating_sub(1);
        Err(BackendError::Transport {
            message: String::from("connection reset"),
        })
    }

    fn pending_create_at(&self, path: &str) -> bool {
        self.operations.values().any(|pending| {
            !pending.operation.status.is_terminal()
                && matches!(&pending.effect, Effect::Create { path: target, .. } if target == path)
        })
    }

    fn submit(&mut self, effect: Effect, result_ref: Option<String>) -> Operation {
        let operation = Operation {
            id: self.allocate_id("op"),
            status: OperationStatus::Pending,
            result_ref,
            error_detail: None,
        };
        let pending = PendingOperation {
            operation: operation.clone(),
            polls_remaining: self.polls_to_settle,
            effect,
            failure: self.fail_next.take(),
        };
        self.operations.insert(operation.id.clone(), pending);
        operation
    }

    fn advance(&mut self, id: &str) -> Result<Operation, BackendError> {
        let stalled = self.stalled;
        let pending = self
            .operations
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound {
                path: format!("/operations/{id}"),
            })?;
        if pending.operation.status.is_terminal() || stalled {
            if stalled {
                pending.operation.status = OperationStatus::Running;
            }
            return Ok(pending.operation.clone());
        }

        pending.polls_remaining = pending.polls_remaining.saturating_sub(1);
        if pending.polls_remaining > 0 {
            pending.operation.status = OperationStatus::Running;
            return Ok(pending.operation.clone());
        }

        let effect = pending.effect.clone();
        let failure = pending.failure.clone();
        let outcome = match failure {
            Some(detail) => Err(detail),
            None => self.apply(effect),
        };
        let settled = self
            .operations
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound {
                path: format!("/operations/{id}"),
            })?;
        match outcome {
            Ok(()) => settled.operation.status = OperationStatus::Succeeded,
            Err(detail) => {
                settled.operation.status = OperationStatus::Failed;
                settled.operation.error_detail = Some(detail);
            }
        }
        Ok(settled.operation.clone())
    }

    fn apply(&mut self, effect: Effect) -> Result<(), String> {
        match effect {
            Effect::Create { path, payload } => {
                if self.resources.contains_key(&path) {
                    return Err(format!("{path} already exists"));
                }
                self.resources.insert(path, payload);
                Ok(())
            }
            Effect::Update { path, patch } => {
                let resource = self
                    .resources
                    .get_mut(&path)
                    .ok_or_else(|| format!("{path} no longer exists"))?;
                for (name, value) in patch {
                    let field = if name == SOURCE_LINK_FIELD {
                        String::from(RECORDED_SOURCE_FIELD)
                    } else {
                        name
                    };
                    resource.fields.insert(field, value);
                }
                Ok(())
            }
            Effect::Delete { path, options } => self.apply_delete(&path, &options),
        }
    }

    fn apply_delete(&mut self, path: &str, options: &DeleteOptions) -> Result<(), String> {
        let Some(resource) = self.resources.get(path) else {
            return Ok(());
        };
        let name = resource.name.clone();
        let kind = kind_of(path);
        let dependants = kind
            .map(|owner| self.dependent_snapshots(path, owner, &name))
            .unwrap_or_default();
        if !dependants.is_empty() {
            if !options.contains(DeleteFlag::DestroySnapshots) {
                return Err(format!("{path} still has {} snapshots", dependants.len()));
            }
            for snapshot in dependants {
                self.resources.remove(&snapshot);
            }
        }

        let soft = kind.is_some_and(|owner| owner.descriptor().soft_delete);
        if soft && !options.contains(DeleteFlag::Eradicate) {
            if let Some(retained) = self.resources.get_mut(path) {
                retained.destroyed = true;
            }
        } else {
            self.resources.remove(path);
        }
        Ok(())
    }

    fn dependent_snapshots(&self, path: &str, owner: ResourceKind, name: &str) -> Vec<String> {
        let scope = parent_path(path);
        let collection = format!("{scope}/snapshots/");
        let reference = FieldValue::text(name);
        self.resources
            .iter()
            .filter(|(candidate, snapshot)| {
                candidate.starts_with(&collection)
                    && !snapshot.destroyed
                    && snapshot.fields.get(owner.as_str()) == Some(&reference)
            })
            .map(|(candidate, _)| candidate.clone())
            .collect()
    }
}

/// Eventually consistent in-memory backend.
///
/// Mutations return a pending operation and take effect only once the
/// operation has been polled to completion (two polls by default). Names are
/// unique per collection, including names claimed by pending creates.
/// Soft-delete kinds keep deleted resources with `destroyed = true` unless
/// the delete asks for eradication.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many polls an operation needs before it completes.
    #[must_use]
    pub fn with_polls_to_settle(self, polls: u32) -> Self {
        self.with_store(|store| store.polls_to_settle = polls.max(1));
        self
    }

    fn with_store<T>(&self, action: impl FnOnce(&mut Store) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        action(&mut store)
    }

    /// Inserts a live resource at `path` and returns its identifier.
    pub fn seed(&self, path: &str, fields: FieldMap) -> String {
        self.with_store(|store| {
            let id = store.allocate_id("res");
            let payload = ResourcePayload {
                id: id.clone(),
                name: last_segment(path).to_owned(),
                destroyed: false,
                fields,
            };
            store.resources.insert(path.to_owned(), payload);
            id
        })
    }

    /// Returns the stored resource at `path`, bypassing the call log.
    #[must_use]
    pub fn resource(&self, path: &str) -> Option<ResourcePayload> {
        self.with_store(|store| store.resources.get(path).cloned())
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.with_store(|store| store.calls.clone())
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.with_store(|store| store.calls.clear());
    }

    /// Number of mutating calls recorded so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.with_store(|store| store.calls.iter().filter(|call| call.is_mutation()).count())
    }

    /// Makes the next submitted operation fail with `detail`.
    pub fn fail_next_operation(&self, detail: &str) {
        self.with_store(|store| store.fail_next = Some(detail.to_owned()));
    }

    /// Keeps every operation running forever.
    pub fn stall_operations(&self) {
        self.with_store(|store| store.stalled = true);
    }

    /// Makes the next `count` reads report 404 regardless of state.
    pub fn hide_next_reads(&self, count: u32) {
        self.with_store(|store| store.hidden_reads = count);
    }

    /// Makes the next `count` resource reads fail with a transport error.
    pub fn fail_next_reads(&self, count: u32) {
        self.with_store(|store| store.failing_reads = count);
    }

    /// Makes the next `count` operation polls fail with a transport error.
    pub fn fail_next_polls(&self, count: u32) {
        self.with_store(|store| store.failing_polls = count);
    }

    fn record(&self, call: BackendCall) {
        self.with_store(|store| store.calls.push(call));
    }
}

impl Backend for InMemoryBackend {
    fn read<'a>(
        &'a self,
        path: &'a str,
    ) -> BackendFuture<'a, Option<ResourcePayload>, BackendError> {
        self.record(BackendCall::Read(path.to_owned()));
        let found = self.with_store(|store| {
            store.fail_read()?;
            if store.hide_read() {
                return Ok(None);
            }
            Ok(store.resources.get(path).cloned())
        });
        Box::pin(ready(found))
    }

    fn read_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<ResourcePayload>, BackendError> {
        self.record(BackendCall::ReadById(id.to_owned()));
        let found = self.with_store(|store| {
            store.fail_read()?;
            if store.hide_read() {
                return Ok(None);
            }
            Ok(store
                .resources
                .values()
                .find(|payload| payload.id == id)
                .cloned())
        });
        Box::pin(ready(found))
    }

    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BackendFuture<'a, Vec<ResourcePayload>, BackendError> {
        self.record(BackendCall::List(collection.to_owned()));
        let prefix = format!("{collection}/");
        let items = self.with_store(|store| {
            store
                .resources
                .iter()
                .filter(|(path, _)| {
                    path.strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
                })
                .map(|(_, payload)| payload.clone())
                .collect()
        });
        Box::pin(ready(Ok(items)))
    }

    fn create<'a>(
        &'a self,
        collection: &'a str,
        body: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError> {
        self.record(BackendCall::Create(collection.to_owned()));
        let result = self.with_store(|store| {
            let name = body
                .get("name")
                .and_then(FieldValue::as_text)
                .ok_or_else(|| BackendError::Status {
                    status: 400,
                    message: String::from("name is required"),
                })?
                .to_owned();
            let path = format!("{collection}/{name}");
            if store.resources.contains_key(&path) || store.pending_create_at(&path) {
                return Err(BackendError::Conflict {
                    message: format!("{name} already exists in {collection}"),
                });
            }

            let id = store.allocate_id("res");
            let mut fields = body.clone();
            fields.remove("name");
            if let Some(link) = fields.remove(SOURCE_LINK_FIELD) {
                fields.insert(String::from(RECORDED_SOURCE_FIELD), link);
            }
            if let Some(kind) = kind_of(&path) {
                for spec in kind.descriptor().computed_fields() {
                    fields.insert(spec.name.to_owned(), FieldValue::text(format!("{}-{id}", spec.name)));
                }
            }
            let payload = ResourcePayload {
                id: id.clone(),
                name,
                destroyed: false,
                fields,
            };
            Ok(store.submit(Effect::Create { path, payload }, Some(id)))
        });
        Box::pin(ready(result))
    }

    fn update<'a>(
        &'a self,
        path: &'a str,
        patch: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError> {
        self.record(BackendCall::Update(path.to_owned()));
        let result = self.with_store(|store| {
            let id = store
                .resources
                .get(path)
                .map(|payload| payload.id.clone())
                .ok_or_else(|| BackendError::NotFound {
                    path: path.to_owned(),
                })?;
            let effect = Effect::Update {
                path: path.to_owned(),
                patch: patch.clone(),
            };
            Ok(store.submit(effect, Some(id)))
        });
        Box::pin(ready(result))
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
        options: &'a DeleteOptions,
    ) -> BackendFuture<'a, Operation, BackendError> {
        self.record(BackendCall::Delete {
            path: path.to_owned(),
            flags: options.iter().collect(),
        });
        let result = self.with_store(|store| {
            let id = store
                .resources
                .get(path)
                .map(|payload| payload.id.clone())
                .ok_or_else(|| BackendError::NotFound {
                    path: path.to_owned(),
                })?;
            let effect = Effect::Delete {
                path: path.to_owned(),
                options: options.clone(),
            };
            Ok(store.submit(effect, Some(id)))
        });
        Box::pin(ready(result))
    }

    fn operation<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Operation, BackendError> {
        self.record(BackendCall::Operation(id.to_owned()));
        let result = self.with_store(|store| {
            if store.failing_polls > 0 {
                store.failing_polls = store.failing_polls.saturating_sub(1);
                return Err(BackendError::Transport {
                    message: String::from("connection reset by peer"),
                });
            }
            store.advance(id)
        });
        Box::pin(ready(result))
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_path(path: &str) -> &str {
    path.rsplit_once('/')
        .and_then(|(collection, _)| collection.rsplit_once('/'))
        .map_or("", |(parent, _)| parent)
}

fn kind_of(path: &str) -> Option<ResourceKind> {
    let mut tokens = path.rsplit('/');
    tokens.next()?;
    tokens.next().and_then(ResourceKind::from_collection)
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// `None` values remove the variable for the lifetime of the guard.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
