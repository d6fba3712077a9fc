//! Ports - engine の境界にある trait
//!
//! 真実の源は storage。タスク・registry・deployment はすべて `Storage` の
//! 後ろにあり、worker の効果とタスク自身の状態変更を 1 つの transaction で
//! 扱える。

pub mod audit;
pub mod clock;
pub mod id_generator;
pub mod storage;
pub mod tenant;

pub use self::audit::{AuditEvent, AuditSink};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{Storage, Transaction};
pub use self::tenant::{AccountManagement, Tenant, TenantManager, TenantRequest};
