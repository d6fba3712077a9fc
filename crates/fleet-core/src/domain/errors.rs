//! エラー型と運用上の分類
//!
//! - `StorageError`: storage port が報告するもの
//! - `BusinessError`: ポリシーの結果（quota、規約）。retry しても変わらない
//! - `WorkerError`: worker 本体が失敗しうるすべて
//! - `EngineError`: engine 自身の設定・投入エラー
//!
//! retry するか失敗させるかを決めるのは `WorkerError::kind()` だけ。

use thiserror::Error;

use super::task::TaskType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("concurrent modification of {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn conflict(entity: &'static str, id: impl ToString) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("resource limit reached for {resource}")]
    ResourceLimitReached { resource: String },

    #[error("terms and conditions must be accepted")]
    TermsRequired,

    #[error("evaluation instances are not allowed")]
    EvalInstancesNotAllowed,

    #[error("too many evaluation instances for user {user}")]
    TooManyEvalInstancesForUser { user: String },

    #[error("account management failure: {0}")]
    AccountManagement(String),
}

/// 失敗した attempt の運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 無害な競合か一時的なリソース不足。backoff して retry
    Transient,
    /// ポリシーの結果。retry せず失敗
    Business,
    /// 並行更新。attempt 全体を retry
    Conflict,
    /// プログラムかデータの誤り。retry せず失敗
    Invariant,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Conflict)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    /// 外部の協調先（tenant manager、account service）に一時的に届かない
    #[error("downstream failure: {0}")]
    Downstream(String),
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Business(_) => ErrorKind::Business,
            // A record deleted under us is a concurrent modification too.
            WorkerError::Storage(StorageError::Conflict { .. })
            | WorkerError::Storage(StorageError::NotFound { .. }) => ErrorKind::Conflict,
            WorkerError::Storage(StorageError::Unavailable(_)) => ErrorKind::Transient,
            WorkerError::Downstream(_) => ErrorKind::Transient,
            WorkerError::InvalidPayload(_) | WorkerError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no worker registered for task_type={0}")]
    UnknownTaskType(TaskType),

    #[error("missing workers for task types: {0:?}")]
    MissingWorkers(Vec<String>),

    #[error("task_type={task_type} is supported by several workers: {workers:?}")]
    AmbiguousWorker {
        task_type: String,
        workers: Vec<String>,
    },

    #[error("duplicate worker for task_type={0}")]
    DuplicateWorker(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::business(WorkerError::Business(BusinessError::TermsRequired), ErrorKind::Business)]
    #[case::conflict(WorkerError::Storage(StorageError::conflict("registry", "r1")), ErrorKind::Conflict)]
    #[case::vanished(WorkerError::Storage(StorageError::not_found("registry", "r1")), ErrorKind::Conflict)]
    #[case::unavailable(WorkerError::Storage(StorageError::Unavailable("down".into())), ErrorKind::Transient)]
    #[case::downstream(WorkerError::Downstream("timeout".into()), ErrorKind::Transient)]
    #[case::payload(WorkerError::InvalidPayload("bad".into()), ErrorKind::Invariant)]
    #[case::invariant(WorkerError::Invariant("no account id".into()), ErrorKind::Invariant)]
    fn classification(#[case] err: WorkerError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn only_transient_and_conflict_retry() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Business.is_retryable());
        assert!(!ErrorKind::Invariant.is_retryable());
    }

    #[test]
    fn business_error_message_is_surfaced_unchanged() {
        let err: WorkerError = BusinessError::ResourceLimitReached {
            resource: "registry".into(),
        }
        .into();
        assert_eq!(err.to_string(), "resource limit reached for registry");
    }
}
