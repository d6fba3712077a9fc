//! TaskManager - タスクの投入・dispatch・解決
//!
//! # フロー（1 attempt）
//! 1. claim: `Pending|Waiting → Running` を lease 付きの条件付き更新で行う
//! 2. transaction を開き、その中で worker 本体を実行
//! 3. 解決:
//!    - 成功: タスク `Done` + chained タスクを本体の書き込みと一緒に commit。
//!      その後 deferred action、最後に `finally_execute`
//!    - retry 要求: rollback。`Waiting`、`not_before = now + max(delay, immediate_retry_delay)`
//!    - retry 可能なエラー: rollback。policy の backoff で `Waiting`、
//!      attempt を使い切ったら `Failed`
//!    - business / invariant エラー: rollback。`Failed` の後 `finally_execute`
//!
//! # 公平性
//! due なタスクは `(not_before, created_at, id)` 順に取り出す。再投入された
//! タスクは、すでに due だった仕事の後ろに並ぶ。
//!
//! タスク行への書き込みはすべて claim 時の version を条件にする。その間に
//! reaper が取り戻していれば書き込みは conflict し、attempt は放棄される
//! （別の dispatcher が持ち主になっている）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{
    EngineError, StorageError, Task, TaskId, TaskRequest, TaskType, WorkerError, add_duration,
};
use crate::observability::TaskCounts;
use crate::policy::RetryPolicy;
use crate::ports::{Clock, IdGenerator, Storage, Transaction};
use crate::typed::context::AttemptIntent;
use crate::typed::{DynWorker, FinalizeContext, TaskPayload, WorkerContext, WorkerRegistry};

/// `dispatch_next` が一旦あきらめるまでに連続で負けてよい claim 競合の回数
const MAX_CLAIM_RACES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Done,
    Retrying { not_before: DateTime<Utc> },
    Failed { error: String },
    /// attempt の途中で lease が切れ、タスクが取り戻された
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// dispatcher に戻した期限切れ `Running` タスク
    pub reclaimed: usize,
    /// finalization を回復した解決済みタスク
    pub finalized: usize,
}

pub struct TaskManager {
    storage: Arc<dyn Storage>,
    workers: Arc<WorkerRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
    immediate_retry_delay: Duration,
    lease: Duration,
    wakeup: Arc<Notify>,
}

impl TaskManager {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        workers: Arc<WorkerRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry_policy: RetryPolicy,
        immediate_retry_delay: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            storage,
            workers,
            clock,
            ids,
            retry_policy,
            immediate_retry_delay,
            lease,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// worker の retry 要求に対する最小の待ち時間
    pub fn immediate_retry_delay(&self) -> Duration {
        self.immediate_retry_delay
    }

    // ------------------------------------------------------------------
    // 投入
    // ------------------------------------------------------------------

    /// 新しい `Pending` タスクを専用の transaction で永続化する
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, EngineError> {
        let mut tx = self.storage.begin().await?;
        let id = self.submit_in(tx.as_mut(), request).await?;
        tx.commit().await?;
        self.wake();
        Ok(id)
    }

    pub async fn submit_payload<T: TaskPayload>(&self, payload: &T) -> Result<TaskId, EngineError> {
        let request = payload
            .to_request()
            .map_err(|e| EngineError::InvalidTask(format!("{}: {e}", T::TYPE)))?;
        self.submit(request).await
    }

    /// 呼び出し側の transaction にタスクを積む。その transaction が commit
    /// されたときだけ dispatcher から見える。commit 後に `wake` を呼ぶこと。
    pub async fn submit_in(
        &self,
        tx: &mut dyn Transaction,
        request: TaskRequest,
    ) -> Result<TaskId, EngineError> {
        request.validate()?;
        if self.workers.get(&request.task_type).is_none() {
            return Err(EngineError::UnknownTaskType(request.task_type));
        }
        let task = Task::new(self.ids.generate_task_id(), request, self.clock.now());
        let id = task.id();
        debug!(task_id = %id, task_type = %task.task_type(), "task staged");
        tx.insert_task(task).await?;
        Ok(id)
    }

    /// 待機中の dispatcher を起こす
    pub fn wake(&self) {
        self.wakeup.notify_waiters();
    }

    pub(crate) fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    /// 先頭の due タスク（`not_before`、次に `created_at` 順）を claim して実行する。
    /// due なものが無ければ `None`。
    pub async fn dispatch_next(&self) -> Result<Option<DispatchReport>, EngineError> {
        let Some(task) = self.claim_next().await? else {
            return Ok(None);
        };
        let span = info_span!(
            "attempt",
            task_id = %task.id(),
            task_type = %task.task_type(),
            attempt = task.attempts()
        );
        self.run_attempt(task).instrument(span).await.map(Some)
    }

    /// dispatch 待ちタスクの中で最も早い `not_before`
    pub async fn next_wakeup(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        let mut tx = self.storage.begin().await?;
        Ok(tx.next_wakeup().await?)
    }

    pub(crate) async fn claim_next(&self) -> Result<Option<Task>, EngineError> {
        for _ in 0..MAX_CLAIM_RACES {
            let now = self.clock.now();
            let mut tx = self.storage.begin().await?;
            let Some(mut task) = tx.next_due_task(now).await? else {
                return Ok(None);
            };
            task.start_attempt(now, self.lease);
            let claimed = match tx.save_task(task).await {
                Ok(claimed) => claimed,
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            };
            match tx.commit().await {
                Ok(()) => return Ok(Some(claimed)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        debug!("lost every claim race; backing off");
        Ok(None)
    }

    pub(crate) async fn run_attempt(&self, task: Task) -> Result<DispatchReport, EngineError> {
        let attempt = task.attempts();
        let Some(worker) = self.workers.get(task.task_type()) else {
            let error = EngineError::UnknownTaskType(task.task_type().clone()).to_string();
            error!(error = %error, "no worker for claimed task");
            let outcome = self.fail_unroutable(task.clone(), error).await?;
            return Ok(self.report(&task, attempt, outcome));
        };

        let mut ctx = WorkerContext::new(task.id(), attempt);
        let mut tx = self.storage.begin().await?;
        let result = worker
            .execute_dyn(task.payload(), tx.as_mut(), &mut ctx)
            .await;
        let intent = ctx.into_intent();

        let outcome = match (result, intent.retry) {
            (Ok(()), None) => match self.complete(&task, tx, intent).await {
                Ok(done) => {
                    info!("task done");
                    self.finalize(done, worker.as_ref()).await?;
                    AttemptOutcome::Done
                }
                Err(err) => self.handle_failure(task.clone(), err, worker.as_ref()).await?,
            },
            (Ok(()), Some(signal)) => {
                drop(tx);
                debug!(?signal, "worker requested retry");
                let delay = signal.delay().max(self.immediate_retry_delay);
                self.schedule_retry(task.clone(), delay, None).await?
            }
            (Err(err), signal) => {
                drop(tx);
                if let Some(signal) = signal {
                    error!(
                        ?signal,
                        error = %err,
                        "worker signalled retry and failed in the same attempt; retry ignored"
                    );
                }
                self.handle_failure(task.clone(), err, worker.as_ref()).await?
            }
        };
        Ok(self.report(&task, attempt, outcome))
    }

    /// `Done` にして chained タスクを insert し commit する。
    /// deferred action は commit が成功してから実行する。
    async fn complete(
        &self,
        task: &Task,
        mut tx: Box<dyn Transaction>,
        intent: AttemptIntent,
    ) -> Result<Task, WorkerError> {
        let mut done = task.clone();
        done.mark_done(self.clock.now(), self.lease);
        let done = tx.save_task(done).await?;

        let chained = intent.chained.len();
        for request in intent.chained {
            self.submit_in(tx.as_mut(), request)
                .await
                .map_err(|e| match e {
                    EngineError::Storage(e) => WorkerError::Storage(e),
                    other => WorkerError::Invariant(format!("chained task rejected: {other}")),
                })?;
        }
        tx.commit().await?;

        if chained > 0 {
            debug!(chained, "chained tasks committed");
            self.wake();
        }
        for action in intent.deferred {
            if let Err(e) = action().await {
                error!(error = %e, "deferred action failed after commit");
            }
        }
        Ok(done)
    }

    async fn handle_failure(
        &self,
        task: Task,
        err: WorkerError,
        worker: &dyn DynWorker,
    ) -> Result<AttemptOutcome, EngineError> {
        let kind = err.kind();
        if !kind.is_retryable() {
            error!(error = %err, ?kind, "attempt failed; not retrying");
            return self.fail(task, err.to_string(), worker).await;
        }
        if self.retry_policy.is_exhausted(task.attempts()) {
            error!(error = %err, attempts = task.attempts(), "retries exhausted");
            return self
                .fail(task, format!("retries exhausted: {err}"), worker)
                .await;
        }
        let delay = self.retry_policy.next_delay(task.attempts());
        warn!(error = %err, ?kind, ?delay, "attempt failed; will retry");
        self.schedule_retry(task, delay, Some(err.to_string())).await
    }

    async fn schedule_retry(
        &self,
        mut task: Task,
        delay: Duration,
        reason: Option<String>,
    ) -> Result<AttemptOutcome, EngineError> {
        let now = self.clock.now();
        let not_before = add_duration(now, delay);
        task.schedule_retry(now, not_before, reason);
        if self.write_task(task).await?.is_none() {
            return Ok(AttemptOutcome::LeaseLost);
        }
        Ok(AttemptOutcome::Retrying { not_before })
    }

    async fn fail(
        &self,
        mut task: Task,
        error: String,
        worker: &dyn DynWorker,
    ) -> Result<AttemptOutcome, EngineError> {
        task.mark_failed(self.clock.now(), error.clone(), self.lease);
        let Some(failed) = self.write_task(task).await? else {
            return Ok(AttemptOutcome::LeaseLost);
        };
        self.finalize(failed, worker).await?;
        Ok(AttemptOutcome::Failed { error })
    }

    /// 後始末する worker がいない終端: 記録してすぐ archive する
    async fn fail_unroutable(
        &self,
        mut task: Task,
        error: String,
    ) -> Result<AttemptOutcome, EngineError> {
        let now = self.clock.now();
        task.mark_failed(now, error.clone(), self.lease);
        task.mark_finalized(now, Some("no worker to finalize".to_string()));
        match self.write_task(task).await? {
            Some(_) => Ok(AttemptOutcome::Failed { error }),
            None => Ok(AttemptOutcome::LeaseLost),
        }
    }

    /// 解決済みタスクの `finally_execute` を実行して archive する。
    ///
    /// `finally_execute` の失敗はログに出してタスクに記録する。それでも
    /// archive はするので finalization は 1 回だけ。
    pub(crate) async fn finalize(
        &self,
        task: Task,
        worker: &dyn DynWorker,
    ) -> Result<(), EngineError> {
        let ctx = FinalizeContext::of(&task);
        let result = worker
            .finally_execute_dyn(task.payload(), &ctx, task.last_error())
            .await;
        let finalize_error = match result {
            Ok(()) => None,
            Err(e) => {
                error!(
                    task_id = %task.id(),
                    task_type = %task.task_type(),
                    error = %e,
                    "finalization failed"
                );
                Some(e.to_string())
            }
        };

        let mut archived = task;
        archived.mark_finalized(self.clock.now(), finalize_error);
        if self.write_task(archived).await?.is_none() {
            warn!("finalization outlived its lease; archive skipped");
        }
        Ok(())
    }

    /// タスク 1 行の条件付き書き込み。行が先に進んでいたら（lease 喪失）`None`。
    async fn write_task(&self, task: Task) -> Result<Option<Task>, EngineError> {
        let task_id = task.id();
        let mut tx = self.storage.begin().await?;
        let saved = match tx.save_task(task).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => return Ok(self.lease_lost(task_id, e)),
            Err(e) => return Err(e.into()),
        };
        match tx.commit().await {
            Ok(()) => Ok(Some(saved)),
            Err(e) if e.is_conflict() => Ok(self.lease_lost(task_id, e)),
            Err(e) => Err(e.into()),
        }
    }

    fn lease_lost(&self, task_id: TaskId, cause: StorageError) -> Option<Task> {
        warn!(task_id = %task_id, cause = %cause, "lease lost; abandoning attempt");
        None
    }

    fn report(&self, task: &Task, attempt: u32, outcome: AttemptOutcome) -> DispatchReport {
        DispatchReport {
            task_id: task.id(),
            task_type: task.task_type().clone(),
            attempt,
            outcome,
        }
    }

    // ------------------------------------------------------------------
    // 回復と後片付け
    // ------------------------------------------------------------------

    /// 期限切れの attempt を取り戻し、中断された finalization を終わらせる
    pub async fn reap(&self) -> Result<ReapReport, EngineError> {
        let now = self.clock.now();
        let mut report = ReapReport::default();

        let (expired, unfinalized) = {
            let mut tx = self.storage.begin().await?;
            (
                tx.expired_leases(now).await?,
                tx.unfinalized_with_expired_lease(now).await?,
            )
        };

        for mut task in expired {
            let task_id = task.id();
            task.reclaim(now);
            if self.write_task(task).await?.is_some() {
                warn!(task_id = %task_id, "attempt lease expired; task reclaimed");
                report.reclaimed += 1;
            }
        }
        if report.reclaimed > 0 {
            self.wake();
        }

        for mut task in unfinalized {
            task.renew_lease(now, self.lease);
            let Some(claimed) = self.write_task(task).await? else {
                continue;
            };
            let Some(worker) = self.workers.get(claimed.task_type()) else {
                let mut orphan = claimed;
                orphan.mark_finalized(now, Some("no worker to finalize".to_string()));
                self.write_task(orphan).await?;
                continue;
            };
            info!(task_id = %claimed.id(), status = %claimed.status(), "recovering finalization");
            self.finalize(claimed, worker.as_ref()).await?;
            report.finalized += 1;
        }

        Ok(report)
    }

    /// 起動時フック: reap を 1 回流して crash で止まった仕事を再開する
    pub async fn recover(&self) -> Result<ReapReport, EngineError> {
        let report = self.reap().await?;
        info!(
            reclaimed = report.reclaimed,
            finalized = report.finalized,
            "recovery pass complete"
        );
        Ok(report)
    }

    /// `retention` より古い archive 済みタスクを削除する
    pub async fn purge(&self, retention: Duration) -> Result<usize, EngineError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| self.clock.now().checked_sub_signed(r))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut tx = self.storage.begin().await?;
        let purged = tx.purge_finalized(cutoff).await?;
        tx.commit().await?;
        Ok(purged)
    }

    pub async fn counts(&self) -> Result<TaskCounts, EngineError> {
        let mut tx = self.storage.begin().await?;
        let tasks = tx.list_tasks().await?;
        Ok(TaskCounts::tally(&tasks))
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, EngineError> {
        let mut tx = self.storage.begin().await?;
        Ok(tx.get_task(id).await?)
    }
}
