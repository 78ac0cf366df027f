//! Remote task service ports - バックエンド API の抽象化
//!
//! Poller と Launcher はこの trait だけを見る。
//! 実装は impls::HttpApiClient（本番）と impls::InMemoryTaskService（開発・テスト）。

use async_trait::async_trait;

use crate::domain::{CreateRequest, CreateResponse, StatusReport, TaskId};

/// Errors talking to the backend.
///
/// All of these are transient from the poller's point of view: the task keeps
/// its status and the attempt still counts toward the cap.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Status {
                status: status.as_u16(),
                endpoint: err.url().map(|u| u.path().to_string()).unwrap_or_default(),
            }
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Reports the current status of a task (`GET /task_status`).
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<StatusReport, ServiceError>;
}

/// Starts graph creation work (`GET /create_graph_11`, `GET /create_graph_12`).
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn create_graph(&self, request: &CreateRequest) -> Result<CreateResponse, ServiceError>;
}
