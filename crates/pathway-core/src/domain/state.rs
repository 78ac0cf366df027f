//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a background task.
///
/// State transitions:
/// - Processing -> Processing (service reports neither error nor completion)
/// - Processing -> Completed (service reports completed)
/// - Processing -> Failed (service reports an error, or the attempt cap is hit)
/// - Pending -> Processing (reserved for creation flows not yet confirmed by the server)
///
/// Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Reserved; no current creation flow produces it.
    Pending,

    /// Accepted by the server and being polled.
    Processing,

    /// Finished successfully.
    Completed,

    /// Failed (reported error or timed out).
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is this task eligible for status checks?
    pub fn is_pollable(self) -> bool {
        matches!(self, TaskStatus::Processing)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Pending | TaskStatus::Processing) => true,
            (TaskStatus::Processing, TaskStatus::Processing) => true,
            (TaskStatus::Processing, TaskStatus::Completed | TaskStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Display tag for this status.
    pub fn tag(self) -> StatusTag {
        match self {
            TaskStatus::Processing => StatusTag {
                label: "in progress",
                tone: Tone::Processing,
            },
            TaskStatus::Completed => StatusTag {
                label: "completed",
                tone: Tone::Success,
            },
            TaskStatus::Failed => StatusTag {
                label: "failed",
                tone: Tone::Error,
            },
            TaskStatus::Pending => StatusTag {
                label: "waiting",
                tone: Tone::Default,
            },
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual tone of a status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Processing,
    Success,
    Error,
    Default,
}

/// Label + tone pair rendered next to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusTag {
    pub label: &'static str,
    pub tone: Tone,
}
