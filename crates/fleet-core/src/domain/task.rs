//! 永続タスクのレコード

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TaskId;
use super::errors::EngineError;
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 呼び出し側が `submit` に渡すもの
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    /// 最も早い dispatch 時刻。省略時は「今」
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl TaskRequest {
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            task_type,
            payload,
            not_before: None,
        }
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// 形の検査: engine は payload の中身を見ないが、worker が自分の
    /// payload 構造体にデコードできるよう JSON object である必要がある。
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.task_type.as_str().trim().is_empty() {
            return Err(EngineError::InvalidTask("task type is empty".to_string()));
        }
        if !self.payload.is_object() {
            return Err(EngineError::InvalidTask(format!(
                "payload of {} must be a JSON object",
                self.task_type
            )));
        }
        Ok(())
    }
}

/// 永続化された作業単位
///
/// ID・種別・payload・作成時刻は構築後に変わらない。ライフサイクル系の
/// フィールドは engine が管理し、変更メソッドは crate 内限定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) task_type: TaskType,
    pub(crate) payload: serde_json::Value,
    pub(crate) status: TaskStatus,

    /// これまでに開始した attempt の数
    pub(crate) attempts: u32,

    pub(crate) not_before: DateTime<Utc>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,

    /// claim の期限。`Running` の間と、終端タスクが finalization を待つ間に設定される
    pub(crate) lease_until: Option<DateTime<Utc>>,

    pub(crate) last_error: Option<String>,

    /// 終端は記録済み、`finally_execute` は未実行
    pub(crate) needs_finalization: bool,
    pub(crate) finalized_at: Option<DateTime<Utc>>,
    pub(crate) finalize_error: Option<String>,

    /// 楽観的並行制御のカウンタ（storage が管理）。0 = 未保存
    #[serde(default)]
    pub(crate) version: u64,
}

impl Task {
    pub(crate) fn new(id: TaskId, request: TaskRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type: request.task_type,
            payload: request.payload,
            status: TaskStatus::Pending,
            attempts: 0,
            not_before: request.not_before.unwrap_or(now),
            created_at: now,
            updated_at: now,
            lease_until: None,
            last_error: None,
            needs_finalization: false,
            finalized_at: None,
            finalize_error: None,
            version: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn lease_until(&self) -> Option<DateTime<Utc>> {
        self.lease_until
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn needs_finalization(&self) -> bool {
        self.needs_finalization
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn finalize_error(&self) -> Option<&str> {
        self.finalize_error.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// storage アダプタが commit のたびに進める
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// `now` で claim 可能か
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dispatchable() && self.not_before <= now
    }

    /// `now` で有効な claim（dispatch か finalization）を持っているか
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.is_some_and(|until| until > now)
    }

    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.lease_until = Some(add_duration(now, lease));
        self.updated_at = now;
    }

    pub(crate) fn mark_done(&mut self, now: DateTime<Utc>, finalize_lease: Duration) {
        self.status = TaskStatus::Done;
        self.last_error = None;
        self.needs_finalization = true;
        self.lease_until = Some(add_duration(now, finalize_lease));
        self.updated_at = now;
    }

    pub(crate) fn mark_failed(
        &mut self,
        now: DateTime<Utc>,
        error: String,
        finalize_lease: Duration,
    ) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error);
        self.needs_finalization = true;
        self.lease_until = Some(add_duration(now, finalize_lease));
        self.updated_at = now;
    }

    pub(crate) fn schedule_retry(
        &mut self,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
        reason: Option<String>,
    ) {
        self.status = TaskStatus::Waiting;
        self.not_before = not_before;
        self.lease_until = None;
        self.last_error = reason;
        self.updated_at = now;
    }

    /// crash した attempt のタスクを dispatcher に戻す
    pub(crate) fn reclaim(&mut self, now: DateTime<Utc>) {
        self.schedule_retry(now, now, Some("lease expired".to_string()));
    }

    pub(crate) fn renew_lease(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.lease_until = Some(add_duration(now, lease));
        self.updated_at = now;
    }

    pub(crate) fn mark_finalized(&mut self, now: DateTime<Utc>, finalize_error: Option<String>) {
        self.needs_finalization = false;
        self.finalized_at = Some(now);
        self.finalize_error = finalize_error;
        self.lease_until = None;
        self.updated_at = now;
    }
}

/// `at + d`。遠い未来で飽和する
pub fn add_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
