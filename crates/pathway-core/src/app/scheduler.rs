//! PollScheduler - 定期ポーリングの駆動
//!
//! # 状態
//! - Idle: ポーリング対象なし。タイマーなし。Registry の変更を待つ
//! - Polling: タイマー 1 本で poll_cycle() を回す
//! - Stopped: shutdown 済み
//!
//! Registry が変わるたびに対象の有無を見直し、
//! 「対象あり & タイマーなし → 開始」「対象なし & タイマーあり → 停止」を冪等に行う。
//! タイマーが 2 本になることはない。
//!
//! tick ごとのチェックはタスク単位で spawn する。遅いリクエストが次の tick を
//! 遅らせることはない（同じタスクへの二重リクエストは Poller の in-flight で弾く）。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::poller::{CycleReport, Poller};
use crate::domain::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Stopped,
}

/// Handle to the background polling driver.
/// - drop するか `shutdown_and_join()` でタイマーが止まる
pub struct PollScheduler {
    poller: Arc<Poller>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SchedulerState>,
    join: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Start the driver. Must be called inside a tokio runtime.
    pub fn spawn(poller: Arc<Poller>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);

        let join = tokio::spawn(drive(Arc::clone(&poller), shutdown_rx, state_tx));

        Self {
            poller,
            shutdown_tx,
            state_rx,
            join: Some(join),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.state() == SchedulerState::Polling
    }

    /// Manual refresh. Runs one extra cycle now; the timer keeps its cadence.
    pub async fn refresh(&self) -> CycleReport {
        self.poller.refresh().await
    }

    /// Ask the driver to stop. An in-flight cycle is allowed to finish.
    pub fn request_shutdown(&self) {
        // ignore send error: driver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the driver.
    pub async fn shutdown_and_join(mut self) {
        self.request_shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

enum Wake {
    Shutdown,
    Changed,
}

async fn wait_for_change(
    shutdown_rx: &mut watch::Receiver<bool>,
    changes: &mut watch::Receiver<u64>,
) -> Wake {
    tokio::select! {
        res = shutdown_rx.changed() => match res {
            Ok(()) if !*shutdown_rx.borrow() => Wake::Changed,
            _ => Wake::Shutdown,
        },
        res = changes.changed() => match res {
            Ok(()) => Wake::Changed,
            Err(_) => Wake::Shutdown,
        },
    }
}

/// Start one independent check per due task.
async fn dispatch(poller: &Arc<Poller>, checks: &mut JoinSet<()>) -> usize {
    // 終わったものは回収しておく
    while checks.try_join_next().is_some() {}

    let due: Vec<TaskId> = poller.due().await;
    for task_id in &due {
        let poller = Arc::clone(poller);
        let task_id = task_id.clone();
        checks.spawn(async move {
            poller.check_and_settle(&task_id).await;
        });
    }
    due.len()
}

async fn drive(
    poller: Arc<Poller>,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SchedulerState>,
) {
    let mut changes = poller.registry().subscribe();
    let mut checks = JoinSet::new();
    let period = poller.config().poll_interval;

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 見直し前に既読にしておく（取りこぼし防止）
        changes.mark_unchanged();
        if !poller.eligible().await {
            // 上限に達したまま processing のタスクがあればここで片付ける
            poller.enforce_attempt_cap().await;
            state_tx.send_replace(SchedulerState::Idle);
            match wait_for_change(&mut shutdown_rx, &mut changes).await {
                Wake::Shutdown => break,
                Wake::Changed => continue,
            }
        }

        info!(interval_ms = period.as_millis() as u64, "polling started");
        state_tx.send_replace(SchedulerState::Polling);

        // 最初の tick は即時
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        break 'outer;
                    }
                }
                res = changes.changed() => {
                    if res.is_err() {
                        break 'outer;
                    }
                    if !poller.eligible().await {
                        info!("nothing left to poll, timer stopped");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let dispatched = dispatch(&poller, &mut checks).await;
                    let timed_out = poller.enforce_attempt_cap().await;
                    debug!(dispatched, timed_out, "scheduled tick");
                    if !poller.eligible().await {
                        info!("nothing left to poll, timer stopped");
                        break;
                    }
                }
            }
        }
    }

    // 応答待ちのチェックは打ち切る
    checks.shutdown().await;
    state_tx.send_replace(SchedulerState::Stopped);
    debug!("poll scheduler stopped");
}
