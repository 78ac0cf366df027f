//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpApiClient**: reqwest によるバックエンドクライアント（本番用）
//! - **InMemoryTaskService**: 台本どおりに応答する開発用・テスト用バックエンド

pub mod http;
pub mod inmem_service;

// 主要な型を再エクスポート
pub use self::http::{ClientConfig, HttpApiClient, DEFAULT_BASE_URL};
pub use self::inmem_service::{InMemoryTaskService, ScriptStep};
