//! TaskRegistry - セッション中のタスク一覧（正本）
//!
//! # 設計
//! - Vec で挿入順を保持し、HashMap<TaskId, usize> で引く
//! - PollingCount も同じロックの中で持つ（タスクと寿命が同じ）
//! - 変更のたびに watch の revision を進めて、Scheduler や表示側に知らせる
//! - ロックの中で await しない

use std::collections::HashMap;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::domain::{Task, TaskId, TaskPatch, TaskStatus};

/// RegistryError は TaskRegistry の操作エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} is already registered")]
    Duplicate(TaskId),

    #[error("task {0} is not registered")]
    UnknownTask(TaskId),

    #[error("task {0} is already {1} and can no longer change")]
    Finalized(TaskId, TaskStatus),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// A task together with its polling count.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTask {
    pub task: Task,
    pub polls: u32,
}

/// Which processing tasks may still be polled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// Processing and under the attempt cap.
    pub eligible: Vec<TaskId>,

    /// Processing but out of attempts.
    pub capped: Vec<TaskId>,
}

impl Eligibility {
    pub fn any_eligible(&self) -> bool {
        !self.eligible.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    polls: HashMap<TaskId, u32>,
}

impl RegistryState {
    fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut Task> {
        self.index.get(task_id).map(|&i| &mut self.tasks[i])
    }

    fn polls(&self, task_id: &TaskId) -> u32 {
        self.polls.get(task_id).copied().unwrap_or(0)
    }
}

/// Ordered, de-duplicated collection of the session's tasks.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    revision: watch::Sender<u64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(RegistryState::default()),
            revision,
        }
    }

    /// Receiver that changes on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Add a task. Ids are unique: a second append with the same id is refused.
    pub async fn append(&self, task: Task) -> Result<(), RegistryError> {
        {
            let mut state = self.state.lock().await;
            if state.index.contains_key(&task.task_id) {
                return Err(RegistryError::Duplicate(task.task_id));
            }
            debug!(task_id = %task.task_id, kind = task.kind.label(), "task registered");
            let position = state.tasks.len();
            state.index.insert(task.task_id.clone(), position);
            state.tasks.push(task);
        }
        self.bump();
        Ok(())
    }

    /// Merge `patch` into the task with `task_id`; every other task is untouched.
    ///
    /// Unknown ids and terminal tasks are left alone. An unknown id means a
    /// caller bug, so it is logged.
    pub async fn patch(&self, task_id: &TaskId, patch: TaskPatch) -> Result<(), RegistryError> {
        {
            let mut state = self.state.lock().await;
            let Some(task) = state.get_mut(task_id) else {
                warn!(task_id = %task_id, "patch for unknown task ignored");
                return Err(RegistryError::UnknownTask(task_id.clone()));
            };

            if task.is_terminal() {
                debug!(task_id = %task_id, status = %task.status, "patch for finished task ignored");
                return Err(RegistryError::Finalized(task_id.clone(), task.status));
            }

            if let Some(next) = patch.status
                && !task.status.can_transition_to(next)
            {
                return Err(RegistryError::InvalidTransition {
                    task_id: task_id.clone(),
                    from: task.status,
                    to: next,
                });
            }

            task.apply(patch);
        }
        self.bump();
        Ok(())
    }

    /// Count one status-check attempt for a processing task.
    ///
    /// Returns the new count, or `None` when the task is unknown or no longer
    /// processing (the counter only moves while processing).
    pub async fn record_attempt(&self, task_id: &TaskId) -> Option<u32> {
        let count = {
            let mut state = self.state.lock().await;
            if !state.get(task_id)?.status.is_pollable() {
                return None;
            }
            let count = state.polls.entry(task_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.bump();
        Some(count)
    }

    pub async fn polling_count(&self, task_id: &TaskId) -> u32 {
        self.state.lock().await.polls(task_id)
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.state.lock().await.get(task_id).cloned()
    }

    /// Processing tasks in registry order. Read-only.
    pub async fn list_processing(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .iter()
            .filter(|t| t.status.is_pollable())
            .cloned()
            .collect()
    }

    /// Split processing tasks by whether they still have attempts left.
    pub async fn eligibility(&self, max_attempts: u32) -> Eligibility {
        let state = self.state.lock().await;
        let mut eligibility = Eligibility::default();
        for task in state.tasks.iter().filter(|t| t.status.is_pollable()) {
            if state.polls(&task.task_id) < max_attempts {
                eligibility.eligible.push(task.task_id.clone());
            } else {
                eligibility.capped.push(task.task_id.clone());
            }
        }
        eligibility
    }

    /// Every task with its polling count, in registry order.
    pub async fn snapshot(&self) -> Vec<TrackedTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .iter()
            .map(|task| TrackedTask {
                task: task.clone(),
                polls: state.polls(&task.task_id),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
