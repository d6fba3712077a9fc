//! Impls - 開発・テスト用のプロセス内アダプタ
//!
//! - **MemoryStorage**: 楽観的並行制御つきの transactional ストア
//! - **MemoryAuditSink** / **TracingAuditSink**
//! - **InMemoryTenantManager**: 冪等な tenant の記録
//! - **QuotaAccountManagement**: `QuotaConfig` による所有者ごとの上限
//!
//! 本番用アダプタ（SQL storage、HTTP tenant manager）は別 crate で同じ
//! ports を実装する。

pub mod account;
pub mod audit;
pub mod memory_storage;
pub mod tenant;

pub use self::account::QuotaAccountManagement;
pub use self::audit::{MemoryAuditSink, TracingAuditSink};
pub use self::memory_storage::{CommittedState, MemoryStorage};
pub use self::tenant::InMemoryTenantManager;
