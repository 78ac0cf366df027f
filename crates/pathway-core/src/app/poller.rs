//! Poller - processing タスクの状態確認
//!
//! # フロー（1 サイクル）
//! 1. Registry から「processing かつ上限未満」のタスクを取る
//! 2. タスクごとに TaskService::fetch_status() を並行に発行
//! 3. 応答ごとに decide() → Registry::patch() を適用
//! 4. 上限に達した processing タスクを timeout で failed にする
//!
//! タイマーは持たない。定期実行は Scheduler の仕事。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::TaskRegistry;
use crate::domain::{decide, TaskId, Transition};
use crate::ports::{Clock, TaskService};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_POLLING_ATTEMPTS: u32 = 60;

/// Polling cadence. The defaults give a task about five minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    #[serde(rename = "poll_interval_ms", with = "crate::config::millis")]
    pub poll_interval: Duration,

    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLLING_ATTEMPTS,
        }
    }
}

/// Result of checking one task.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Service says the task is still running.
    Stayed,

    /// Task moved to a terminal state.
    Finished(Transition),

    /// The request failed; status untouched, attempt consumed.
    TransientError(String),

    /// Another check for this task has not returned yet.
    InFlight,

    /// Task is not processing (or unknown) any more.
    NotProcessing,

    /// Task has used all of its attempts.
    Capped,
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub stayed: usize,
    pub completed: usize,
    pub failed: usize,
    pub transient_errors: usize,
    pub skipped: usize,
    pub timed_out: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::Stayed => self.stayed += 1,
            CheckOutcome::Finished(Transition::Complete { .. }) => self.completed += 1,
            CheckOutcome::Finished(_) => self.failed += 1,
            CheckOutcome::TransientError(_) => self.transient_errors += 1,
            CheckOutcome::InFlight | CheckOutcome::NotProcessing | CheckOutcome::Capped => {
                self.skipped += 1;
                return;
            }
        }
        self.checked += 1;
    }
}

/// Marks a task as having a request in flight until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<TaskId>>,
    task_id: TaskId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

/// Applies status reports from the task service to the registry.
pub struct Poller {
    registry: Arc<TaskRegistry>,
    service: Arc<dyn TaskService>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    in_flight: Mutex<HashSet<TaskId>>,
}

impl Poller {
    pub fn new(
        registry: Arc<TaskRegistry>,
        service: Arc<dyn TaskService>,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            registry,
            service,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    fn claim(&self, task_id: &TaskId) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(task_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            task_id: task_id.clone(),
        })
    }

    /// Is any task processing with attempts left?
    pub async fn eligible(&self) -> bool {
        self.registry
            .eligibility(self.config.max_attempts)
            .await
            .any_eligible()
    }

    /// Check one task once.
    pub async fn check(&self, task_id: &TaskId) -> CheckOutcome {
        // 同じタスクへのリクエストは同時に 1 本まで
        let Some(_guard) = self.claim(task_id) else {
            debug!(task_id = %task_id, "check already in flight, skipping");
            return CheckOutcome::InFlight;
        };

        if self.registry.polling_count(task_id).await >= self.config.max_attempts {
            return CheckOutcome::Capped;
        }
        let Some(attempt) = self.registry.record_attempt(task_id).await else {
            return CheckOutcome::NotProcessing;
        };

        let report = match self.service.fetch_status(task_id).await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    attempt,
                    error = %err,
                    "status check failed, will retry next cycle"
                );
                return CheckOutcome::TransientError(err.to_string());
            }
        };

        let transition = decide(&report);
        let Some(patch) = transition.clone().into_patch(self.clock.now()) else {
            debug!(task_id = %task_id, attempt, "task still processing");
            return CheckOutcome::Stayed;
        };

        match self.registry.patch(task_id, patch).await {
            Ok(()) => {
                info!(task_id = %task_id, attempt, transition = ?transition, "task finished");
                CheckOutcome::Finished(transition)
            }
            Err(err) => {
                debug!(task_id = %task_id, error = %err, "transition not applied");
                CheckOutcome::NotProcessing
            }
        }
    }

    fn is_in_flight(&self, task_id: &TaskId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task_id)
    }

    /// Processing tasks that may be checked now.
    pub async fn due(&self) -> Vec<TaskId> {
        self.registry
            .eligibility(self.config.max_attempts)
            .await
            .eligible
    }

    async fn time_out(&self, task_id: &TaskId) -> bool {
        let Some(patch) = Transition::timeout().into_patch(self.clock.now()) else {
            return false;
        };
        if self.registry.patch(task_id, patch).await.is_err() {
            return false;
        }
        warn!(
            task_id = %task_id,
            max_attempts = self.config.max_attempts,
            "task timed out"
        );
        true
    }

    /// Fail every processing task that has used up its attempts.
    ///
    /// A task whose last check is still in flight is left alone; that check
    /// settles it when its answer arrives. Returns how many tasks were timed out.
    pub async fn enforce_attempt_cap(&self) -> usize {
        let capped = self
            .registry
            .eligibility(self.config.max_attempts)
            .await
            .capped;

        let mut timed_out = 0;
        for task_id in capped {
            if self.is_in_flight(&task_id) {
                debug!(task_id = %task_id, "last check still in flight, cap deferred");
                continue;
            }
            if self.time_out(&task_id).await {
                timed_out += 1;
            }
        }
        timed_out
    }

    /// Check one task, then time it out if that was its last attempt and it is
    /// still processing. Used by the scheduler, which runs checks independently.
    pub async fn check_and_settle(&self, task_id: &TaskId) -> CheckOutcome {
        let outcome = self.check(task_id).await;
        let capped = matches!(
            outcome,
            CheckOutcome::Stayed | CheckOutcome::TransientError(_)
        ) && self.registry.polling_count(task_id).await >= self.config.max_attempts;
        if capped && !self.is_in_flight(task_id) {
            self.time_out(task_id).await;
        }
        outcome
    }

    /// One full cycle: check every eligible task concurrently, then apply the cap.
    pub async fn poll_cycle(&self) -> CycleReport {
        let eligible = self.due().await;

        let mut report = CycleReport::default();
        if !eligible.is_empty() {
            let outcomes = join_all(eligible.iter().map(|id| self.check(id))).await;
            for outcome in &outcomes {
                report.record(outcome);
            }
        }

        report.timed_out = self.enforce_attempt_cap().await;
        if report != CycleReport::default() {
            debug!(?report, "poll cycle finished");
        }
        report
    }

    /// Manual refresh: an extra cycle outside the schedule.
    pub async fn refresh(&self) -> CycleReport {
        debug!("manual refresh");
        self.poll_cycle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Task, TaskKind, TaskStatus, TIMEOUT_MESSAGE};
    use crate::impls::{InMemoryTaskService, ScriptStep};
    use crate::ports::SystemClock;
    use chrono::Utc;

    struct Fixture {
        registry: Arc<TaskRegistry>,
        service: Arc<InMemoryTaskService>,
        poller: Poller,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let registry = Arc::new(TaskRegistry::new());
        let service = Arc::new(InMemoryTaskService::with_system_ids());
        let poller = Poller::new(
            Arc::clone(&registry),
            service.clone(),
            Arc::new(SystemClock),
            PollerConfig {
                poll_interval: Duration::from_secs(5),
                max_attempts,
            },
        );
        Fixture {
            registry,
            service,
            poller,
        }
    }

    async fn add(registry: &TaskRegistry, id: &str) -> TaskId {
        let task_id = TaskId::new(id);
        registry
            .append(Task::processing(
                task_id.clone(),
                TaskKind::L1GraphCreation,
                id,
                None,
                Utc::now(),
            ))
            .await
            .unwrap();
        task_id
    }

    #[tokio::test]
    async fn reported_error_fails_within_one_cycle() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;
        f.service.script(&id, [ScriptStep::failed("boom")]).await;

        let report = f.poller.poll_cycle().await;

        assert_eq!(report.failed, 1);
        let task = f.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn completion_carries_result_and_message() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;
        let result = serde_json::json!({"graph_id": "g-1", "nodes": 12});
        f.service
            .script(&id, [ScriptStep::completed(Some("done"), Some(result.clone()))])
            .await;

        f.poller.poll_cycle().await;

        let task = f.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.message.as_deref(), Some("done"));
        assert_eq!(task.result, Some(result));
    }

    #[tokio::test]
    async fn polling_count_tracks_cycles() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;

        for _ in 0..7 {
            f.poller.poll_cycle().await;
        }

        assert_eq!(f.registry.polling_count(&id).await, 7);
        assert_eq!(f.service.status_calls(&id).await, 7);
        assert_eq!(f.registry.get(&id).await.unwrap().status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn transient_errors_keep_status_but_use_attempts() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;
        f.service
            .script(
                &id,
                [
                    ScriptStep::Unavailable("connection refused".into()),
                    ScriptStep::completed(None, None),
                ],
            )
            .await;

        let first = f.poller.poll_cycle().await;
        assert_eq!(first.transient_errors, 1);
        assert_eq!(f.registry.get(&id).await.unwrap().status, TaskStatus::Processing);
        assert_eq!(f.registry.polling_count(&id).await, 1);

        f.poller.poll_cycle().await;
        assert_eq!(f.registry.get(&id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn attempt_cap_times_out_and_stops_polling() {
        let f = fixture(3);
        let id = add(&f.registry, "a").await;

        let mut timed_out = 0;
        for _ in 0..3 {
            timed_out += f.poller.poll_cycle().await.timed_out;
        }
        assert_eq!(timed_out, 1);

        let task = f.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message.as_deref(), Some(TIMEOUT_MESSAGE));

        f.poller.poll_cycle().await;
        assert_eq!(f.service.status_calls(&id).await, 3);
        assert!(!f.poller.eligible().await);
    }

    #[tokio::test]
    async fn terminal_tasks_are_never_polled_again() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;
        f.service.script(&id, [ScriptStep::failed("boom")]).await;
        f.poller.poll_cycle().await;
        let finished = f.registry.get(&id).await.unwrap();

        for _ in 0..5 {
            f.poller.poll_cycle().await;
        }

        assert_eq!(f.registry.get(&id).await.unwrap(), finished);
        assert_eq!(f.service.status_calls(&id).await, 1);
        assert_eq!(f.poller.check(&id).await, CheckOutcome::NotProcessing);
    }

    #[tokio::test]
    async fn empty_registry_issues_no_requests() {
        let f = fixture(60);
        let report = f.poller.poll_cycle().await;
        assert_eq!(report, CycleReport::default());
        assert_eq!(f.service.total_status_calls().await, 0);
    }

    #[tokio::test]
    async fn one_failing_task_does_not_block_others() {
        let f = fixture(60);
        let a = add(&f.registry, "a").await;
        let b = add(&f.registry, "b").await;
        f.service
            .script(&a, [ScriptStep::Unavailable("reset".into())])
            .await;
        f.service
            .script(&b, [ScriptStep::completed(Some("ok"), None)])
            .await;

        let report = f.poller.poll_cycle().await;

        assert_eq!(report.transient_errors, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.checked, 2);
        assert_eq!(f.registry.get(&b).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_checks_for_one_task_are_skipped() {
        let f = fixture(60);
        let id = add(&f.registry, "a").await;
        f.service.set_latency(Some(Duration::from_secs(1))).await;

        let (scheduled, manual) = tokio::join!(f.poller.poll_cycle(), f.poller.refresh());

        assert_eq!(f.service.status_calls(&id).await, 1);
        assert_eq!(scheduled.skipped + manual.skipped, 1);
        assert_eq!(f.registry.polling_count(&id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_waits_for_the_last_check_in_flight() {
        let f = fixture(1);
        let id = add(&f.registry, "a").await;
        f.service
            .script(&id, [ScriptStep::completed(Some("done"), None)])
            .await;
        f.service.set_latency(Some(Duration::from_secs(1))).await;

        let (outcome, timed_out) = tokio::join!(f.poller.check(&id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            f.poller.enforce_attempt_cap().await
        });

        assert_eq!(timed_out, 0);
        assert!(matches!(outcome, CheckOutcome::Finished(Transition::Complete { .. })));
        let task = f.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.message.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn check_and_settle_times_out_on_the_last_attempt() {
        let f = fixture(2);
        let id = add(&f.registry, "a").await;

        assert_eq!(f.poller.check_and_settle(&id).await, CheckOutcome::Stayed);
        assert_eq!(f.registry.get(&id).await.unwrap().status, TaskStatus::Processing);

        assert_eq!(f.poller.check_and_settle(&id).await, CheckOutcome::Stayed);
        let task = f.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(f.poller.due().await.is_empty());
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.max_attempts, 60);

        let config: PollerConfig =
            serde_json::from_value(serde_json::json!({"poll_interval_ms": 250})).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 60);
    }
}
