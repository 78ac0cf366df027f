//! TaskLauncher - グラフ作成リクエストからタスクを登録する
//!
//! # フロー
//! 1. 入力チェック（keyword / parent_id が空でない）
//! 2. GraphApi::create_graph()
//! 3. success=true なら processing のタスクを Registry に追加
//! 4. success=false なら Registry には触らず、メッセージを呼び出し側に返す

use std::sync::Arc;

use tracing::{info, warn};

use super::registry::{RegistryError, TaskRegistry};
use crate::domain::{CreateRequest, Task, TaskId, TaskKind};
use crate::ports::{Clock, GraphApi, ServiceError};

/// Why a creation did not produce a task.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("keyword must not be empty")]
    EmptyKeyword,

    #[error("parent graph id must not be empty")]
    MissingParent,

    #[error("creation rejected: {0}")]
    Rejected(String),

    #[error("server accepted the request but returned no task id")]
    MissingTaskId,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LaunchError {
    /// The server said no (as opposed to the request never getting through).
    pub fn is_rejection(&self) -> bool {
        matches!(self, LaunchError::Rejected(_))
    }
}

pub struct TaskLauncher {
    api: Arc<dyn GraphApi>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
}

impl TaskLauncher {
    pub fn new(api: Arc<dyn GraphApi>, registry: Arc<TaskRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            registry,
            clock,
        }
    }

    /// Ask the backend to build a graph and start tracking the task.
    pub async fn launch(&self, request: CreateRequest) -> Result<TaskId, LaunchError> {
        let keyword = request.keyword().trim();
        if keyword.is_empty() {
            return Err(LaunchError::EmptyKeyword);
        }
        if request.parent_id().is_some_and(|p| p.is_blank()) {
            return Err(LaunchError::MissingParent);
        }

        let response = self.api.create_graph(&request).await?;
        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "creation rejected by server".to_string());
            warn!(keyword, %message, "graph creation rejected");
            return Err(LaunchError::Rejected(message));
        }

        let task_id = response
            .task_id
            .filter(|id| !id.is_blank())
            .ok_or(LaunchError::MissingTaskId)?;

        let kind = request.kind();
        let task = Task::processing(
            task_id.clone(),
            kind,
            keyword,
            request.parent_id().cloned(),
            self.clock.now(),
        );
        self.registry.append(task).await?;

        info!(task_id = %task_id, kind = kind.label(), keyword, "graph creation started");
        Ok(task_id)
    }

    /// 別セッションで作成済みのタスクを追跡対象にする（API は呼ばない）
    pub async fn track(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        keyword: impl Into<String>,
    ) -> Result<(), LaunchError> {
        if task_id.is_blank() {
            return Err(LaunchError::MissingTaskId);
        }
        let task = Task::processing(task_id.clone(), kind, keyword, None, self.clock.now());
        self.registry.append(task).await?;
        info!(task_id = %task_id, kind = kind.label(), "tracking existing task");
        Ok(())
    }
}
