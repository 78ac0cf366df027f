//! Monitor - タスク一覧の読み取りモデル
//!
//! Registry のスナップショットから表示用の TaskView を作る。
//! 状態は持たない（毎回 Registry から組み立て直す）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::{TaskRegistry, TrackedTask};
use crate::domain::{StatusTag, Task, TaskStatus};
use crate::ports::Clock;

/// One row of the task list.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub task: Task,
    pub polls: u32,

    /// Only set while the task is processing.
    pub progress_percent: Option<f64>,

    pub tag: StatusTag,
    pub duration_secs: i64,
}

/// 0..=100, capped.
pub fn progress_percent(polls: u32, max_attempts: u32) -> f64 {
    if max_attempts == 0 {
        return 100.0;
    }
    (f64::from(polls) / f64::from(max_attempts) * 100.0).min(100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

pub struct TaskMonitor {
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl TaskMonitor {
    pub fn new(registry: Arc<TaskRegistry>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            registry,
            clock,
            max_attempts,
        }
    }

    /// Rows in registry order.
    pub async fn views(&self) -> Vec<TaskView> {
        let now = self.clock.now();
        self.registry
            .snapshot()
            .await
            .into_iter()
            .map(|TrackedTask { task, polls }| {
                let progress_percent = (task.status == TaskStatus::Processing)
                    .then(|| progress_percent(polls, self.max_attempts));
                TaskView {
                    tag: task.status.tag(),
                    duration_secs: task.duration(now).num_seconds(),
                    progress_percent,
                    polls,
                    task,
                }
            })
            .collect()
    }

    pub async fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for tracked in self.registry.snapshot().await {
            counts.add(tracked.task.status);
        }
        counts
    }

    /// True when there is at least one task and none of them is still moving.
    pub async fn all_terminal(&self) -> bool {
        let snapshot = self.registry.snapshot().await;
        !snapshot.is_empty() && snapshot.iter().all(|t| t.task.is_terminal())
    }
}

/// `[in progress] t-1  L1 graph creation "rust"  12s  40%`
pub fn render_line(view: &TaskView) -> String {
    let task = &view.task;
    let mut line = format!(
        "[{}] {}  {} \"{}\"",
        view.tag.label,
        task.task_id,
        task.kind.label(),
        task.keyword
    );
    if let Some(parent) = &task.parent_id {
        line.push_str(&format!(" (parent {parent})"));
    }
    line.push_str(&format!("  {}s", view.duration_secs));
    if let Some(pct) = view.progress_percent {
        line.push_str(&format!("  {pct:.0}%"));
    }
    if let Some(message) = &task.message {
        line.push_str(&format!("  {message}"));
    }
    line
}
