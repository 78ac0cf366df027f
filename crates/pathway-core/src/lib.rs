//! pathway-core
//!
//! Background task lifecycle for graph creation: create → poll → complete/fail.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, task, decision, creation）
//! - **ports**: 抽象化レイヤー（TaskService, GraphApi, Clock, IdGenerator）
//! - **impls**: 実装（reqwest の HttpApiClient、テスト・デモ用の InMemoryTaskService）
//! - **app**: アプリケーションロジック（registry, poller, scheduler, launcher, monitor, builder）
//! - **config**: 接続先とポーリング設定
//! - **error**: PathwayError（各層のエラーをまとめる）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use app::{App, AppBuilder};
pub use config::PathwayConfig;
pub use error::PathwayError;
