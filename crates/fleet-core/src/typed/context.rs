//! WorkerContext - attempt ごとの制御ハンドル
//!
//! context 自身は I/O を行わない。worker 本体が「transaction の結果が
//! 決まった後に何をしてほしいか」を記録するだけ。
//! - `retry()` / `retry_after(d)`: rollback して再 dispatch（すぐ / now + d 以降）
//! - `chain::<T>(&payload)`: 後続タスクを同じ commit で insert
//! - `delay(action)`: commit 成功後にだけ `action` を実行
//!
//! `FinalizeContext` は `finally_execute` 向けの読み取り専用ビュー。

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::warn;

use crate::domain::{Task, TaskId, TaskRequest, TaskStatus, WorkerError};
use crate::typed::task::TaskPayload;

pub type DeferredFuture = Pin<Box<dyn Future<Output = Result<(), WorkerError>> + Send>>;
pub type DeferredAction = Box<dyn FnOnce() -> DeferredFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySignal {
    Immediate,
    After(Duration),
}

impl RetrySignal {
    pub fn delay(self) -> Duration {
        match self {
            RetrySignal::Immediate => Duration::ZERO,
            RetrySignal::After(d) => d,
        }
    }
}

pub struct WorkerContext {
    task_id: TaskId,
    attempt: u32,
    retry: Option<RetrySignal>,
    chained: Vec<TaskRequest>,
    deferred: Vec<DeferredAction>,
}

/// 終わった attempt が要求したこと
pub(crate) struct AttemptIntent {
    pub retry: Option<RetrySignal>,
    pub chained: Vec<TaskRequest>,
    pub deferred: Vec<DeferredAction>,
}

impl WorkerContext {
    pub fn new(task_id: TaskId, attempt: u32) -> Self {
        Self {
            task_id,
            attempt,
            retry: None,
            chained: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 実行中 attempt の番号（1 始まり）
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// この attempt を打ち切り、なるべく早く再 dispatch する。
    ///
    /// engine の `immediate_retry_delay`（既定 50ms）より早くはならない。
    pub fn retry(&mut self) -> Result<(), WorkerError> {
        self.signal(RetrySignal::Immediate);
        Ok(())
    }

    /// この attempt を打ち切る。now + `delay` より前には再 dispatch しない。
    pub fn retry_after(&mut self, delay: Duration) -> Result<(), WorkerError> {
        self.signal(RetrySignal::After(delay));
        Ok(())
    }

    /// 後続タスクを積む。attempt を完了させる commit と同時に insert され、
    /// rollback なら一緒に消える。
    pub fn chain<T: TaskPayload>(&mut self, payload: &T) -> Result<(), WorkerError> {
        let request = payload
            .to_request()
            .map_err(|e| WorkerError::InvalidPayload(format!("{}: {e}", T::TYPE)))?;
        self.chained.push(request);
        Ok(())
    }

    /// attempt の transaction が commit された後で `action` を実行する。
    /// 理由を問わず rollback したら捨てる。
    pub fn delay<F, Fut>(&mut self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.deferred
            .push(Box::new(move || -> DeferredFuture { Box::pin(action()) }));
    }

    pub fn retry_requested(&self) -> Option<RetrySignal> {
        self.retry
    }

    fn signal(&mut self, signal: RetrySignal) {
        if let Some(previous) = self.retry.replace(signal) {
            warn!(
                task_id = %self.task_id,
                ?previous,
                ?signal,
                "retry signalled twice in one attempt; last signal wins"
            );
        }
    }

    pub(crate) fn into_intent(self) -> AttemptIntent {
        AttemptIntent {
            retry: self.retry,
            chained: self.chained,
            deferred: self.deferred,
        }
    }
}

/// `finally_execute` に渡す読み取り専用ビュー
///
/// `execute` と同じ識別子でログを出せるように、解決済みタスクの
/// `task_id` / 最後の `attempt` / 終端 `status` だけを持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeContext {
    task_id: TaskId,
    attempt: u32,
    status: TaskStatus,
}

impl FinalizeContext {
    pub fn new(task_id: TaskId, attempt: u32, status: TaskStatus) -> Self {
        Self {
            task_id,
            attempt,
            status,
        }
    }

    pub(crate) fn of(task: &Task) -> Self {
        Self::new(task.id(), task.attempts(), task.status())
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `Done` か `Failed`
    pub fn status(&self) -> TaskStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RegistryId;
    use crate::typed::task::ProvisionRegistryTenantTask;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fresh_context_requests_nothing() {
        let ctx = WorkerContext::new(TaskId::generate(), 1);
        let intent = ctx.into_intent();

        assert!(intent.retry.is_none());
        assert!(intent.chained.is_empty());
        assert!(intent.deferred.is_empty());
    }

    #[test]
    fn last_retry_signal_wins() {
        let mut ctx = WorkerContext::new(TaskId::generate(), 1);
        ctx.retry().unwrap();
        ctx.retry_after(Duration::from_millis(100)).unwrap();

        assert_eq!(
            ctx.retry_requested(),
            Some(RetrySignal::After(Duration::from_millis(100)))
        );
        assert_eq!(RetrySignal::Immediate.delay(), Duration::ZERO);
    }

    #[test]
    fn chain_stages_typed_request() {
        let mut ctx = WorkerContext::new(TaskId::generate(), 1);
        let registry_id = RegistryId::generate();
        ctx.chain(&ProvisionRegistryTenantTask { registry_id }).unwrap();

        let intent = ctx.into_intent();
        assert_eq!(intent.chained.len(), 1);
        assert_eq!(
            intent.chained[0].task_type.as_str(),
            ProvisionRegistryTenantTask::TYPE
        );
    }

    #[tokio::test]
    async fn delayed_action_runs_only_when_invoked() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut ctx = WorkerContext::new(TaskId::generate(), 1);
        let flag = Arc::clone(&ran);
        ctx.delay(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let mut intent = ctx.into_intent();
        assert!(!ran.load(Ordering::SeqCst));

        let action = intent.deferred.pop().unwrap();
        action().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
