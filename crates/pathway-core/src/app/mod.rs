//! App - アプリケーション層
//!
//! ports を組み合わせてタスクのライフサイクルを回す。
//!
//! # 主要コンポーネント
//! - **TaskRegistry**: タスク一覧の唯一の持ち主（append / patch / polling count）
//! - **Poller**: 1 サイクル分の状態確認と上限チェック
//! - **PollScheduler**: タイマーの開始・停止（常に 0 本か 1 本）
//! - **TaskLauncher**: 作成リクエスト → processing タスク登録
//! - **TaskMonitor**: 表示用の読み取りモデル
//! - **AppBuilder**: ワイヤリング

pub mod builder;
pub mod launcher;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod scheduler;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::launcher::{LaunchError, TaskLauncher};
pub use self::monitor::{progress_percent, render_line, TaskCounts, TaskMonitor, TaskView};
pub use self::poller::{
    CheckOutcome, CycleReport, Poller, PollerConfig, DEFAULT_MAX_POLLING_ATTEMPTS,
    DEFAULT_POLL_INTERVAL,
};
pub use self::registry::{Eligibility, RegistryError, TaskRegistry, TrackedTask};
pub use self::scheduler::{PollScheduler, SchedulerState};
