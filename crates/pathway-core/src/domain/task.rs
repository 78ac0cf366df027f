//! Task record: one tracked graph-creation request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GraphId, TaskId, TaskStatus};

/// Kind of work a task stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    L1GraphCreation,
    L2GraphCreation,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::L1GraphCreation => "L1 graph creation",
            TaskKind::L2GraphCreation => "L2 graph creation",
        }
    }
}

/// A background task as tracked by the client.
///
/// Identity fields (`task_id`, `kind`, `keyword`, `parent_id`, `created_at`) never change.
/// `status`, `message`, `result` and `updated_at` are only written through
/// [`TaskPatch`] by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub keyword: String,
    pub parent_id: Option<GraphId>,
    pub status: TaskStatus,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly accepted task, already `Processing`.
    pub fn processing(
        task_id: TaskId,
        kind: TaskKind,
        keyword: impl Into<String>,
        parent_id: Option<GraphId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            kind,
            keyword: keyword.into(),
            parent_id,
            status: TaskStatus::Processing,
            message: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed time: frozen at `updated_at` once terminal, running otherwise.
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = if self.is_terminal() {
            self.updated_at
        } else {
            now
        };
        (end - self.created_at).max(chrono::Duration::zero())
    }

    /// Merge a patch into this record.
    pub(crate) fn apply(&mut self, patch: TaskPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(message) = patch.message {
            self.message = Some(message);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        self.updated_at = patch.updated_at;
    }
}

/// Partial update of a task. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl TaskPatch {
    pub fn completed(
        message: impl Into<String>,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            message: Some(message.into()),
            result,
            updated_at: now,
        }
    }

    pub fn failed(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            message: Some(message.into()),
            result: None,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_task_is_processing() {
        let task = Task::processing(
            TaskId::new("t1"),
            TaskKind::L2GraphCreation,
            "rust",
            Some(GraphId::new("g1")),
            t0(),
        );
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.kind.label(), "L2 graph creation");
        assert!(task.message.is_none());
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut task = Task::processing(TaskId::new("t1"), TaskKind::L1GraphCreation, "rust", None, t0());
        let later = t0() + chrono::Duration::seconds(30);

        task.apply(TaskPatch::completed(
            "done",
            Some(serde_json::json!({"graph": 1})),
            later,
        ));

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.message.as_deref(), Some("done"));
        assert_eq!(task.result, Some(serde_json::json!({"graph": 1})));
        assert_eq!(task.updated_at, later);
        assert_eq!(task.created_at, t0());
        assert_eq!(task.keyword, "rust");
    }

    #[test]
    fn duration_freezes_when_terminal() {
        let mut task = Task::processing(TaskId::new("t1"), TaskKind::L1GraphCreation, "rust", None, t0());
        let now = t0() + chrono::Duration::seconds(90);
        assert_eq!(task.duration(now).num_seconds(), 90);

        task.apply(TaskPatch::failed("boom", t0() + chrono::Duration::seconds(12)));
        assert_eq!(task.duration(now).num_seconds(), 12);
    }
}
