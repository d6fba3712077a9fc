//! fleet-core
//!
//! マルチテナント registry fleet の非同期タスク実行基盤
//!
//! # モジュール
//! - **domain**: モデル（ID、タスク、registry、deployment、エラー）
//! - **ports**: 境界（Storage/Transaction, Clock, IdGenerator, AuditSink, TenantManager, AccountManagement）
//! - **typed**: 型付きタスク API（TaskPayload, Worker, WorkerContext, FinalizeContext, WorkerRegistry）
//! - **app**: engine（EngineBuilder, TaskManager, dispatcher/reaper/gc ループ）
//! - **policy**: retry の backoff と deployment の配置
//! - **workers**: registry ライフサイクルの worker（schedule, provision, deprovision）
//! - **auth**: 読み取り権限のラッパー
//! - **service**: リクエスト側の FleetService
//! - **impls**: インメモリのアダプタ
//! - **config** / **observability**: 設定と tracing の初期化

pub mod app;
pub mod auth;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod service;
pub mod typed;
pub mod workers;
