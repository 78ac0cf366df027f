//! Graph creation requests and the server's answer.

use serde::{Deserialize, Serialize};

use super::{GraphId, TaskId, TaskKind};

/// What the user asked the backend to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateRequest {
    /// Top-level knowledge graph for a keyword.
    L1 { keyword: String },

    /// Second-level graph hanging off an existing graph.
    L2 { keyword: String, parent_id: GraphId },
}

impl CreateRequest {
    pub fn l1(keyword: impl Into<String>) -> Self {
        CreateRequest::L1 {
            keyword: keyword.into(),
        }
    }

    pub fn l2(keyword: impl Into<String>, parent_id: impl Into<GraphId>) -> Self {
        CreateRequest::L2 {
            keyword: keyword.into(),
            parent_id: parent_id.into(),
        }
    }

    pub fn keyword(&self) -> &str {
        match self {
            CreateRequest::L1 { keyword } | CreateRequest::L2 { keyword, .. } => keyword,
        }
    }

    pub fn parent_id(&self) -> Option<&GraphId> {
        match self {
            CreateRequest::L1 { .. } => None,
            CreateRequest::L2 { parent_id, .. } => Some(parent_id),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            CreateRequest::L1 { .. } => TaskKind::L1GraphCreation,
            CreateRequest::L2 { .. } => TaskKind::L2GraphCreation,
        }
    }
}

/// Body of `GET /create_graph_11` and `GET /create_graph_12`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CreateResponse {
    pub fn accepted(task_id: TaskId) -> Self {
        Self {
            success: true,
            task_id: Some(task_id),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            task_id: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accessors() {
        let l1 = CreateRequest::l1("rust");
        assert_eq!(l1.keyword(), "rust");
        assert!(l1.parent_id().is_none());
        assert_eq!(l1.kind(), TaskKind::L1GraphCreation);

        let l2 = CreateRequest::l2("ownership", "g-1");
        assert_eq!(l2.keyword(), "ownership");
        assert_eq!(l2.parent_id(), Some(&GraphId::new("g-1")));
        assert_eq!(l2.kind(), TaskKind::L2GraphCreation);
    }

    #[test]
    fn response_decodes_server_shape() {
        let ok: CreateResponse =
            serde_json::from_str(r#"{"success": true, "task_id": "abc", "message": "started"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.task_id, Some(TaskId::new("abc")));

        let rejected: CreateResponse =
            serde_json::from_str(r#"{"success": false, "message": "parent not found"}"#).unwrap();
        assert!(!rejected.success);
        assert!(rejected.task_id.is_none());
        assert_eq!(rejected.message.as_deref(), Some("parent not found"));
    }
}
