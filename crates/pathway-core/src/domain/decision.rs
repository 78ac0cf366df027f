//! Decision model: what a status report means for a processing task.
//!
//! The poller fetches a [`StatusReport`], [`decide`] turns it into a
//! [`Transition`], and the registry applies the resulting patch. `decide` is a
//! pure function; it never looks at the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskPatch;

/// Message stored when the service reports completion without one.
pub const DEFAULT_COMPLETED_MESSAGE: &str = "task complete";

/// Message stored when a task runs out of polling attempts.
pub const TIMEOUT_MESSAGE: &str = "task processing timed out";

/// Body of `GET /task_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    /// Raw server-side status string, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StatusReport {
    /// Still running: neither completed nor failed.
    pub fn running() -> Self {
        Self::default()
    }

    pub fn completed(message: Option<&str>, result: Option<serde_json::Value>) -> Self {
        Self {
            completed: true,
            result,
            message: message.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// The next state of a processing task.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Keep polling.
    Stay,

    /// Move to `Completed`.
    Complete {
        message: String,
        result: Option<serde_json::Value>,
    },

    /// Move to `Failed`.
    Fail { message: String },
}

impl Transition {
    /// Forced failure once the attempt cap is reached.
    pub fn timeout() -> Self {
        Transition::Fail {
            message: TIMEOUT_MESSAGE.to_string(),
        }
    }

    /// Patch to hand to the registry, `None` for `Stay`.
    pub fn into_patch(self, now: DateTime<Utc>) -> Option<TaskPatch> {
        match self {
            Transition::Stay => None,
            Transition::Complete { message, result } => {
                Some(TaskPatch::completed(message, result, now))
            }
            Transition::Fail { message } => Some(TaskPatch::failed(message, now)),
        }
    }
}

/// Decide the transition for one status report.
///
/// A reported error wins over `completed`. An empty error string counts as no
/// error; any other text (whitespace included) is stored as-is.
pub fn decide(report: &StatusReport) -> Transition {
    if let Some(error) = report.error.as_deref().filter(|e| !e.is_empty()) {
        return Transition::Fail {
            message: error.to_string(),
        };
    }

    if report.completed {
        let message = report
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_COMPLETED_MESSAGE)
            .to_string();
        return Transition::Complete {
            message,
            result: report.result.clone(),
        };
    }

    Transition::Stay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::error_only(StatusReport::failed("boom"), Transition::Fail { message: "boom".into() })]
    #[case::error_beats_completed(
        StatusReport { completed: true, error: Some("boom".into()), ..Default::default() },
        Transition::Fail { message: "boom".into() }
    )]
    #[case::completed_with_message(
        StatusReport::completed(Some("done"), Some(json!({"id": 7}))),
        Transition::Complete { message: "done".into(), result: Some(json!({"id": 7})) }
    )]
    #[case::completed_default_message(
        StatusReport::completed(None, None),
        Transition::Complete { message: DEFAULT_COMPLETED_MESSAGE.into(), result: None }
    )]
    #[case::still_running(StatusReport::running(), Transition::Stay)]
    #[case::empty_error_is_ignored(
        StatusReport { completed: true, error: Some(String::new()), message: Some("done".into()), ..Default::default() },
        Transition::Complete { message: "done".into(), result: None }
    )]
    #[case::empty_error_while_running(
        StatusReport { error: Some(String::new()), ..Default::default() },
        Transition::Stay
    )]
    #[case::whitespace_error_kept_verbatim(
        StatusReport { completed: true, error: Some("  ".into()), ..Default::default() },
        Transition::Fail { message: "  ".into() }
    )]
    fn decide_follows_report(#[case] report: StatusReport, #[case] expected: Transition) {
        assert_eq!(decide(&report), expected);
    }

    #[test]
    fn report_tolerates_missing_fields() {
        let report: StatusReport = serde_json::from_value(json!({"status": "processing"})).unwrap();
        assert!(!report.completed);
        assert!(report.error.is_none());
        assert_eq!(decide(&report), Transition::Stay);

        let report: StatusReport =
            serde_json::from_value(json!({"completed": false, "error": null, "result": null, "message": null}))
                .unwrap();
        assert_eq!(decide(&report), Transition::Stay);
    }

    #[test]
    fn timeout_becomes_failed_patch() {
        let now = Utc::now();
        let patch = Transition::timeout().into_patch(now).unwrap();
        assert_eq!(patch.status, Some(TaskStatus::Failed));
        assert_eq!(patch.message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(patch.updated_at, now);
        assert!(Transition::Stay.into_patch(now).is_none());
    }
}
