//! ログの初期化と状態ビュー

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::{Task, TaskStatus};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// グローバルな `tracing` subscriber を設定する。
///
/// フィルタは `RUST_LOG`（既定 `info`）。複数回呼んでもよく、2 回目以降は何もしない。
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// 状態ごとのタスク数と、finalization 待ちの数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub waiting: usize,
    pub failed: usize,
    pub done: usize,
    pub unfinalized: usize,
}

impl TaskCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Waiting => counts.waiting += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Done => counts.done += 1,
            }
            if task.needs_finalization() {
                counts.unfinalized += 1;
            }
        }
        counts
    }

    pub fn in_flight(&self) -> usize {
        self.pending + self.running + self.waiting + self.unfinalized
    }
}
