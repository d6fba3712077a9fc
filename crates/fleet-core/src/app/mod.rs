//! App - ports から組み立てた engine
//!
//! # コンポーネント
//! - **EngineBuilder**: 組み立てと fail-fast 検証
//! - **TaskManager**: submit → claim → execute → resolve → finalize
//! - **DispatcherGroup**: 並列の dispatch ループ
//! - **ReaperLoop**: lease 切れと finalization の回復
//! - **GCLoop**: archive 済みタスクの削除

pub mod builder;
pub mod gc_loop;
pub mod manager;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::EngineBuilder;
pub use self::gc_loop::GCLoop;
pub use self::manager::{AttemptOutcome, DispatchReport, ReapReport, TaskManager};
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::DispatcherGroup;
