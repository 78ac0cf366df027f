//! AppBuilder - ワイヤリングと起動時検証
//!
//! # Fail-fast
//! - poll_interval = 0 や max_attempts = 0 は build() で弾く
//! - 実行中に設定ミスが見つかることはない

use std::sync::Arc;
use std::time::Duration;

use super::launcher::TaskLauncher;
use super::monitor::TaskMonitor;
use super::poller::{Poller, PollerConfig};
use super::registry::TaskRegistry;
use super::scheduler::PollScheduler;
use crate::ports::{Clock, GraphApi, SystemClock, TaskService};

/// # 使用例
/// ```ignore
/// let client = Arc::new(HttpApiClient::new(&config.client)?);
/// let app = AppBuilder::new(client.clone(), client)
///     .poller_config(config.poller)
///     .build()?;
/// let scheduler = app.start_polling();
/// ```
pub struct AppBuilder {
    task_service: Arc<dyn TaskService>,
    graph_api: Arc<dyn GraphApi>,
    clock: Arc<dyn Clock>,
    poller_config: PollerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("poll interval must be greater than zero (got {0:?})")]
    ZeroInterval(Duration),

    #[error("max polling attempts must be greater than zero")]
    ZeroAttempts,
}

impl AppBuilder {
    pub fn new(task_service: Arc<dyn TaskService>, graph_api: Arc<dyn GraphApi>) -> Self {
        Self {
            task_service,
            graph_api,
            clock: Arc::new(SystemClock),
            poller_config: PollerConfig::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.poller_config;
        if config.poll_interval.is_zero() {
            return Err(BuildError::ZeroInterval(config.poll_interval));
        }
        if config.max_attempts == 0 {
            return Err(BuildError::ZeroAttempts);
        }

        let registry = Arc::new(TaskRegistry::new());
        let monitor = TaskMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&self.clock),
            config.max_attempts,
        );
        let launcher = TaskLauncher::new(
            self.graph_api,
            Arc::clone(&registry),
            Arc::clone(&self.clock),
        );
        let poller = Arc::new(Poller::new(
            Arc::clone(&registry),
            self.task_service,
            self.clock,
            config,
        ));

        Ok(App {
            registry,
            poller,
            launcher,
            monitor,
        })
    }
}

/// Wired client session: one registry shared by everything else.
pub struct App {
    pub registry: Arc<TaskRegistry>,
    pub poller: Arc<Poller>,
    pub launcher: TaskLauncher,
    pub monitor: TaskMonitor,
}

impl App {
    /// Spawn the polling driver. Must be called inside a tokio runtime.
    pub fn start_polling(&self) -> PollScheduler {
        PollScheduler::spawn(Arc::clone(&self.poller))
    }
}
