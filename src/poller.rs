//! Waits for asynchronous backend operations to settle.
//!
//! The poller sleeps between polls, issues one operation read per poll, and
//! re-reads the affected resource once the operation succeeds so callers see
//! post-operation state. Timeouts and cancellation leave the backend
//! operation running; both are reported as indeterminate errors.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Operation, OperationStatus, ResourcePayload};
use crate::error::ReconcileError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ATTEMPTS: u32 = 600;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Cadence and limits applied while waiting for an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first poll, and between polls at fixed cadence.
    pub interval: Duration,
    /// Upper bound for exponential cadence; `None` keeps the interval fixed.
    pub max_interval: Option<Duration>,
    /// Maximum number of backend reads issued while waiting.
    pub max_attempts: u32,
    /// Time allowed for a single backend read.
    pub attempt_timeout: Duration,
    /// Overall time allowed for the operation to settle.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl PollPolicy {
    /// Polls every `interval`, at most `max_attempts` times.
    #[must_use]
    pub const fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_interval: None,
            max_attempts,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Doubles the delay after each poll, starting at `interval` and capped
    /// at `max_interval`.
    #[must_use]
    pub const fn capped_exponential(
        interval: Duration,
        max_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            interval,
            max_interval: Some(max_interval),
            max_attempts,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Sets the per-read timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the delay to use after waiting `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        self.max_interval.map_or(self.interval, |cap| {
            current.saturating_mul(2).min(cap).max(self.interval)
        })
    }
}

/// What the settled resource is expected to look like.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    /// The resource should exist; reads that miss it are retried because the
    /// backend may not have caught up yet.
    Present,
    /// The resource should be gone or soft-deleted; reads that still see it
    /// live are retried, and the last payload is returned when the budget
    /// runs out.
    Gone,
}

/// Drives an [`Operation`] to a terminal state.
pub struct OperationPoller<'b, B: ?Sized> {
    backend: &'b B,
    policy: &'b PollPolicy,
}

struct Budget {
    operation_id: String,
    attempts: u32,
    last_error: Option<String>,
    /// `None` when the deadline lies beyond what [`Instant`] can represent.
    deadline: Option<Instant>,
    interval: Duration,
}

impl Budget {
    fn exhausted(&self, policy: &PollPolicy) -> bool {
        self.attempts >= policy.max_attempts
            || self.deadline.is_some_and(|deadline| Instant::now() > deadline)
    }

    async fn pause(&mut self, policy: &PollPolicy) {
        sleep(self.interval).await;
        self.interval = policy.next_interval(self.interval);
        self.attempts = self.attempts.saturating_add(1);
    }

    fn timeout(&self) -> ReconcileError {
        warn!(
            operation_id = %self.operation_id,
            attempts = self.attempts,
            "operation did not settle in time; outcome is indeterminate"
        );
        ReconcileError::Timeout {
            operation_id: self.operation_id.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

impl<'b, B> OperationPoller<'b, B>
where
    B: Backend + ?Sized,
{
    /// Creates a poller over `backend` using `policy`.
    #[must_use]
    pub const fn new(backend: &'b B, policy: &'b PollPolicy) -> Self {
        Self { backend, policy }
    }

    /// Waits for `operation` to settle and returns the re-read resource.
    ///
    /// The resource is read through the operation's `result_ref` when set and
    /// through `fallback_path` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::OperationFailed`] when the backend reports a
    /// failure and [`ReconcileError::Timeout`] when the attempt budget or the
    /// deadline runs out first.
    pub async fn await_operation(
        &self,
        operation: Operation,
        fallback_path: &str,
        visibility: Visibility,
    ) -> Result<Option<ResourcePayload>, ReconcileError> {
        self.await_operation_until(operation, fallback_path, visibility, std::future::pending())
            .await
    }

    /// Like [`Self::await_operation`], but stops early when `cancel`
    /// resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Cancelled`] when `cancel` resolves first, in
    /// addition to the errors of [`Self::await_operation`].
    pub async fn await_operation_until<C>(
        &self,
        operation: Operation,
        fallback_path: &str,
        visibility: Visibility,
        cancel: C,
    ) -> Result<Option<ResourcePayload>, ReconcileError>
    where
        C: Future<Output = ()> + Send,
    {
        let operation_id = operation.id.clone();
        tokio::select! {
            biased;
            () = cancel => {
                warn!(operation_id = %operation_id, "cancelled while waiting; outcome is indeterminate");
                Err(ReconcileError::Cancelled { operation_id })
            }
            settled = self.drive(operation, fallback_path, visibility) => settled,
        }
    }

    async fn drive(
        &self,
        operation: Operation,
        fallback_path: &str,
        visibility: Visibility,
    ) -> Result<Option<ResourcePayload>, ReconcileError> {
        let mut budget = Budget {
            operation_id: operation.id.clone(),
            attempts: 0,
            last_error: None,
            deadline: Instant::now().checked_add(self.policy.deadline),
            interval: self.policy.interval,
        };

        let mut current = operation;
        while !current.status.is_terminal() {
            if budget.exhausted(self.policy) {
                return Err(budget.timeout());
            }
            budget.pause(self.policy).await;
            match timeout(self.policy.attempt_timeout, self.backend.operation(&current.id)).await {
                Ok(Ok(next)) => {
                    debug!(
                        operation_id = %next.id,
                        status = ?next.status,
                        attempt = budget.attempts,
                        "polled operation"
                    );
                    current = next;
                }
                Ok(Err(err)) => {
                    warn!(operation_id = %current.id, error = %err, "transient error while polling operation");
                    budget.last_error = Some(err.to_string());
                }
                Err(_) => {
                    warn!(operation_id = %current.id, "operation poll timed out");
                    budget.last_error = Some(format!(
                        "poll timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    ));
                }
            }
        }

        if current.status == OperationStatus::Failed {
            return Err(ReconcileError::OperationFailed {
                operation_id: current.id,
                detail: current
                    .error_detail
                    .unwrap_or_else(|| String::from("no detail reported")),
            });
        }
        info!(operation_id = %current.id, "operation succeeded");

        self.settle(&current, fallback_path, visibility, &mut budget)
            .await
    }

    async fn settle(
        &self,
        operation: &Operation,
        fallback_path: &str,
        visibility: Visibility,
        budget: &mut Budget,
    ) -> Result<Option<ResourcePayload>, ReconcileError> {
        loop {
            let read = operation
                .result_ref
                .as_deref()
                .filter(|id| !id.is_empty())
                .map_or_else(
                    || self.backend.read(fallback_path),
                    |id| self.backend.read_by_id(id),
                );
            // `None` when the read itself failed; the mutation is applied
            // either way, so errors here are retried like poll errors.
            let observed = match timeout(self.policy.attempt_timeout, read).await {
                Ok(Ok(payload)) => {
                    let settled = match visibility {
                        Visibility::Present => payload.is_some(),
                        Visibility::Gone => payload.as_ref().is_none_or(|live| live.destroyed),
                    };
                    if settled {
                        return Ok(payload);
                    }
                    if visibility == Visibility::Present {
                        budget.last_error = Some(String::from("resource not yet visible"));
                    }
                    Some(payload)
                }
                Ok(Err(err)) => {
                    warn!(operation_id = %operation.id, error = %err, "transient error while reading settled resource");
                    budget.last_error = Some(err.to_string());
                    None
                }
                Err(_) => {
                    warn!(operation_id = %operation.id, "settled resource read timed out");
                    budget.last_error = Some(format!(
                        "read timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    ));
                    None
                }
            };
            if budget.exhausted(self.policy) {
                return match (visibility, observed) {
                    (Visibility::Gone, Some(payload)) => Ok(payload),
                    _ => Err(budget.timeout()),
                };
            }
            debug!(
                operation_id = %operation.id,
                attempt = budget.attempts,
                "resource has not caught up with the operation yet"
            );
            budget.pause(self.policy).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DeleteOptions;
    use crate::state::FieldMap;
    use crate::test_support::InMemoryBackend;
    use rstest::rstest;

    const PATH: &str = "/tenants/t1";

    fn fast_policy() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(1), 20)
    }

    async fn submit_tenant(backend: &InMemoryBackend) -> Operation {
        let mut body = FieldMap::new();
        body.insert(String::from("name"), "t1".into());
        body.insert(String::from("display_name"), "Tenant".into());
        backend
            .create("/tenants", &body)
            .await
            .expect("create should be accepted")
    }

    #[tokio::test]
    async fn waits_for_success_and_reads_result() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new().with_polls_to_settle(3);
        let operation = submit_tenant(&backend).await;
        let poller = OperationPoller::new(&backend, &policy);

        let payload = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect("operation settles")
            .expect("resource is visible");
        assert_eq!(payload.name, "t1");
    }

    #[tokio::test]
    async fn failed_operation_surfaces_detail() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new();
        backend.fail_next_operation("quota exceeded");
        let operation = submit_tenant(&backend).await;
        let poller = OperationPoller::new(&backend, &policy);

        let err = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect_err("operation fails");
        assert!(matches!(
            err,
            ReconcileError::OperationFailed { ref detail, .. } if detail == "quota exceeded"
        ));
        assert!(backend.resource(PATH).is_none());
    }

    #[tokio::test]
    async fn stalled_operation_times_out_as_indeterminate() {
        let backend = InMemoryBackend::new();
        backend.stall_operations();
        let operation = submit_tenant(&backend).await;
        let policy = PollPolicy::fixed(Duration::from_millis(1), 4);
        let poller = OperationPoller::new(&backend, &policy);

        let err = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect_err("operation never settles");
        assert!(err.is_indeterminate());
        assert!(matches!(err, ReconcileError::Timeout { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn transient_poll_errors_are_retried() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new();
        backend.fail_next_polls(2);
        let operation = submit_tenant(&backend).await;
        let poller = OperationPoller::new(&backend, &policy);

        let payload = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect("operation settles despite transient errors");
        assert!(payload.is_some());
    }

    #[tokio::test]
    async fn late_visibility_is_retried() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new();
        let operation = submit_tenant(&backend).await;
        backend.hide_next_reads(2);
        let poller = OperationPoller::new(&backend, &policy);

        let payload = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect("operation settles");
        assert!(payload.is_some());
    }

    #[tokio::test]
    async fn read_errors_after_success_are_retried() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new();
        let operation = submit_tenant(&backend).await;
        backend.fail_next_reads(2);
        let poller = OperationPoller::new(&backend, &policy);

        let payload = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect("read errors are transient");
        assert!(payload.is_some());
    }

    #[tokio::test]
    async fn unreadable_result_times_out_as_indeterminate() {
        let policy = PollPolicy::fixed(Duration::from_millis(1), 6);
        let backend = InMemoryBackend::new();
        let operation = submit_tenant(&backend).await;
        backend.fail_next_reads(u32::MAX);
        let poller = OperationPoller::new(&backend, &policy);

        let err = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect_err("result never readable");
        assert!(err.is_indeterminate());
        assert!(matches!(
            err,
            ReconcileError::Timeout { last_error: Some(ref message), .. }
                if message.contains("connection reset")
        ));
        assert!(backend.resource(PATH).is_some());
    }

    #[tokio::test]
    async fn unreadable_delete_result_is_not_reported_as_residual() {
        let policy = PollPolicy::fixed(Duration::from_millis(1), 6);
        let backend = InMemoryBackend::new();
        backend.seed(PATH, FieldMap::new());
        let operation = backend
            .delete(PATH, &DeleteOptions::new())
            .await
            .expect("delete should be accepted");
        backend.fail_next_reads(u32::MAX);
        let poller = OperationPoller::new(&backend, &policy);

        let err = poller
            .await_operation(operation, PATH, Visibility::Gone)
            .await
            .expect_err("result never readable");
        assert!(err.is_indeterminate());
    }

    #[tokio::test]
    async fn unrepresentable_deadline_does_not_bound_polling() {
        let policy = fast_policy().with_deadline(Duration::from_secs(u64::MAX));
        let backend = InMemoryBackend::new();
        let operation = submit_tenant(&backend).await;
        let poller = OperationPoller::new(&backend, &policy);

        let payload = poller
            .await_operation(operation, PATH, Visibility::Present)
            .await
            .expect("operation settles");
        assert!(payload.is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let policy = fast_policy();
        let backend = InMemoryBackend::new();
        backend.stall_operations();
        let operation = submit_tenant(&backend).await;
        let poller = OperationPoller::new(&backend, &policy);

        let err = poller
            .await_operation_until(operation, PATH, Visibility::Present, std::future::ready(()))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ReconcileError::Cancelled { .. }));
        assert!(err.is_indeterminate());
    }

    #[rstest]
    #[case(None, [100, 100, 100])]
    #[case(Some(350), [200, 350, 350])]
    fn cadence_follows_policy(#[case] cap_ms: Option<u64>, #[case] expected: [u64; 3]) {
        let interval = Duration::from_millis(100);
        let policy = cap_ms.map_or_else(
            || PollPolicy::fixed(interval, 10),
            |cap| PollPolicy::capped_exponential(interval, Duration::from_millis(cap), 10),
        );
        let mut current = interval;
        for want in expected {
            current = policy.next_interval(current);
            assert_eq!(current, Duration::from_millis(want));
        }
    }
}
