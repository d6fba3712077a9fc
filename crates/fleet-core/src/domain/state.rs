//! タスクのライフサイクル状態

use serde::{Deserialize, Serialize};
use std::fmt;

/// 永続タスクの状態
///
/// # 状態遷移
/// - Pending -> Running -> Done
/// - Pending -> Running -> Waiting -> Running -> ... (retry / retry_after)
/// - Pending -> Running -> Failed (business error, invariant violation, retries exhausted)
/// - Running -> Waiting (lease expired, reclaimed by the reaper)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// 投入済み、未実行
    Pending,

    /// dispatcher が claim 中。`lease_until` までが有効
    Running,

    /// retry 待ち。`not_before` までは対象外
    Waiting,

    /// 終端の失敗。二度と dispatch しない
    Failed,

    /// 終端の成功
    Done,
}

impl TaskStatus {
    /// 終端状態からは dispatch しない
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// この状態のタスクを dispatcher が claim できるか（時刻は別途）
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Waiting)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskStatus::Pending, false, true)]
    #[case::running(TaskStatus::Running, false, false)]
    #[case::waiting(TaskStatus::Waiting, false, true)]
    #[case::failed(TaskStatus::Failed, true, false)]
    #[case::done(TaskStatus::Done, true, false)]
    fn classification(
        #[case] status: TaskStatus,
        #[case] terminal: bool,
        #[case] dispatchable: bool,
    ) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_dispatchable(), dispatchable);
    }

    #[test]
    fn serializes_in_screaming_case() {
        let s = serde_json::to_string(&TaskStatus::Waiting).unwrap();
        assert_eq!(s, "\"WAITING\"");
        assert_eq!(TaskStatus::Waiting.to_string(), "WAITING");
    }
}
