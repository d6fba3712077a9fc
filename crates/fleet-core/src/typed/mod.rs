//! Typed task API.
//!
//! # 2 層構造
//! - **Typed**: `TaskPayload`, `Worker<T>`。タスク種別タグは payload 型から
//!   来るので、typo で別の worker に回ることはない。
//! - **Dyn**: `DynWorker`。object-safe で `WorkerRegistry` に格納する。

pub mod context;
pub mod registry;
pub mod task;
pub mod worker;

pub use self::context::{FinalizeContext, RetrySignal, WorkerContext};
pub use self::registry::WorkerRegistry;
pub use self::task::{
    DeprovisionRegistryTask, ProvisionRegistryTenantTask, ScheduleRegistryTask, TaskPayload,
};
pub use self::worker::{DynWorker, TypedWorker, Worker};
