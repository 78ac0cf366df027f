//! InMemoryTaskService - 開発用・テスト用のバックエンド
//!
//! # 学習ポイント
//! - 本物の HTTP サーバなしで Poller / Launcher を動かす
//! - task ごとの「台本」（ScriptStep の列）で応答を決める
//! - 呼び出し回数を数えて、ポーリングの振る舞いを検証できる

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CreateRequest, CreateResponse, StatusReport, TaskId};
use crate::ports::{GraphApi, IdGenerator, ServiceError, SystemClock, TaskService, UlidGenerator};

/// One scripted answer to a status request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Report(StatusReport),

    /// The request fails before reaching the service.
    Unavailable(String),
}

impl ScriptStep {
    pub fn running() -> Self {
        ScriptStep::Report(StatusReport::running())
    }

    pub fn completed(message: Option<&str>, result: Option<serde_json::Value>) -> Self {
        ScriptStep::Report(StatusReport::completed(message, result))
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ScriptStep::Report(StatusReport::failed(error))
    }

    fn answer(&self) -> Result<StatusReport, ServiceError> {
        match self {
            ScriptStep::Report(report) => Ok(report.clone()),
            ScriptStep::Unavailable(reason) => Err(ServiceError::Transport(reason.clone())),
        }
    }
}

#[derive(Default)]
struct ServiceState {
    /// Remaining steps per task. The last step repeats forever.
    scripts: HashMap<TaskId, VecDeque<ScriptStep>>,

    /// Script given to tasks minted by `create_graph`.
    default_script: Vec<ScriptStep>,

    /// Status calls per task.
    calls: HashMap<TaskId, u32>,

    /// Accepted creation requests, in order.
    created: Vec<(TaskId, CreateRequest)>,

    /// When set, creations are refused with this message.
    reject_with: Option<String>,

    latency: Option<Duration>,

    /// Per-task delay, overrides `latency`.
    task_latency: HashMap<TaskId, Duration>,
}

/// Scripted stand-in for the graph backend.
pub struct InMemoryTaskService {
    state: Mutex<ServiceState>,
    id_gen: Arc<dyn IdGenerator>,
}

impl InMemoryTaskService {
    pub fn new(id_gen: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            id_gen,
        }
    }

    /// Service minting ULID task ids from the system clock.
    pub fn with_system_ids() -> Self {
        Self::new(Arc::new(UlidGenerator::new(SystemClock)))
    }

    /// Replace the script for one task.
    pub async fn script(&self, task_id: &TaskId, steps: impl IntoIterator<Item = ScriptStep>) {
        let mut state = self.state.lock().await;
        state.scripts.insert(task_id.clone(), steps.into_iter().collect());
    }

    /// Script used for every task created from now on.
    pub async fn set_default_script(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.state.lock().await.default_script = steps.into_iter().collect();
    }

    /// Refuse creations with `message` (`None` to accept again).
    pub async fn reject_creations(&self, message: Option<&str>) {
        self.state.lock().await.reject_with = message.map(str::to_string);
    }

    /// Delay every status answer (simulates a slow backend).
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Delay status answers for one task only.
    pub async fn set_task_latency(&self, task_id: &TaskId, latency: Option<Duration>) {
        let mut state = self.state.lock().await;
        match latency {
            Some(latency) => state.task_latency.insert(task_id.clone(), latency),
            None => state.task_latency.remove(task_id),
        };
    }

    pub async fn status_calls(&self, task_id: &TaskId) -> u32 {
        let state = self.state.lock().await;
        state.calls.get(task_id).copied().unwrap_or(0)
    }

    pub async fn total_status_calls(&self) -> u32 {
        self.state.lock().await.calls.values().sum()
    }

    pub async fn created(&self) -> Vec<(TaskId, CreateRequest)> {
        self.state.lock().await.created.clone()
    }
}

#[async_trait]
impl TaskService for InMemoryTaskService {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<StatusReport, ServiceError> {
        let (answer, latency) = {
            let mut state = self.state.lock().await;
            *state.calls.entry(task_id.clone()).or_insert(0) += 1;

            let answer = match state.scripts.get_mut(task_id) {
                Some(steps) if steps.len() > 1 => steps.pop_front().map(|s| s.answer()),
                Some(steps) => steps.front().map(ScriptStep::answer),
                None => None,
            };
            let latency = state.task_latency.get(task_id).copied().or(state.latency);
            (answer.unwrap_or_else(|| Ok(StatusReport::running())), latency)
        }; // Lock released here

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        answer
    }
}

#[async_trait]
impl GraphApi for InMemoryTaskService {
    async fn create_graph(&self, request: &CreateRequest) -> Result<CreateResponse, ServiceError> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.reject_with {
            return Ok(CreateResponse::rejected(message.clone()));
        }

        let task_id = self.id_gen.generate_task_id();
        let script: VecDeque<ScriptStep> = state.default_script.iter().cloned().collect();
        if !script.is_empty() {
            state.scripts.insert(task_id.clone(), script);
        }
        state.created.push((task_id.clone(), request.clone()));

        Ok(CreateResponse::accepted(task_id))
    }
}
