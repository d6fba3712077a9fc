//! Worker trait - 1 つのタスク種別を実行する
//!
//! - `Worker<T>`: worker 作者が実装する、payload で型付けされた trait
//! - `DynWorker`: `WorkerRegistry` に格納する object-safe 版
//! - `TypedWorker<T, W>`: `Worker<T>` を `DynWorker` に消去するアダプタ
//!
//! worker が持つのは構築時に渡された共有依存（`Arc<dyn Storage>`、
//! selector、policy）だけ。attempt 固有のものはすべて `WorkerContext` に置く。

use std::marker::PhantomData;

use async_trait::async_trait;

use super::context::{FinalizeContext, WorkerContext};
use super::task::TaskPayload;
use crate::domain::{TaskType, WorkerError};
use crate::ports::Transaction;

#[async_trait]
pub trait Worker<T: TaskPayload>: Send + Sync {
    /// `tx` の中でタスクの効果を実行する。
    ///
    /// engine が呼び出し前に `tx` を開き、本体が retry を要求せずに `Ok` を
    /// 返したときだけ commit する。それ以外の経路では書き込みは捨てられる
    /// ので、本体が取り消し処理を書く必要はない。
    async fn execute(
        &self,
        task: T,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError>;

    /// 終端（`Done` / `Failed`）の後で後始末をする。
    ///
    /// attempt の transaction の外で、解決済みタスクごとに 1 回だけ実行される。
    /// crash 後は別プロセスで動くこともある。状態は読み直すこと、`execute`
    /// が完了したと仮定しないこと。`error` は記録された失敗で、成功なら `None`。
    async fn finally_execute(
        &self,
        task: T,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait DynWorker: Send + Sync {
    /// ログと設定エラー用の worker 名
    fn name(&self) -> &str;

    /// この worker を登録するタスク種別
    fn task_type(&self) -> TaskType;

    /// タスク種別に対する純粋で全域な述語
    fn supports(&self, task_type: &TaskType) -> bool {
        *task_type == self.task_type()
    }

    async fn execute_dyn(
        &self,
        payload: &serde_json::Value,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError>;

    async fn finally_execute_dyn(
        &self,
        payload: &serde_json::Value,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError>;
}

pub struct TypedWorker<T: TaskPayload, W: Worker<T>> {
    worker: W,
    _marker: PhantomData<T>,
}

impl<T: TaskPayload, W: Worker<T>> TypedWorker<T, W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker,
            _marker: PhantomData,
        }
    }

    fn decode(payload: &serde_json::Value) -> Result<T, WorkerError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| WorkerError::InvalidPayload(format!("{}: {e}", T::TYPE)))
    }
}

#[async_trait]
impl<T: TaskPayload, W: Worker<T>> DynWorker for TypedWorker<T, W> {
    fn name(&self) -> &str {
        std::any::type_name::<W>()
    }

    fn task_type(&self) -> TaskType {
        T::task_type()
    }

    fn supports(&self, task_type: &TaskType) -> bool {
        task_type.as_str() == T::TYPE
    }

    async fn execute_dyn(
        &self,
        payload: &serde_json::Value,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError> {
        let task = Self::decode(payload)?;
        self.worker.execute(task, tx, ctx).await
    }

    async fn finally_execute_dyn(
        &self,
        payload: &serde_json::Value,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError> {
        let task = Self::decode(payload)?;
        self.worker.finally_execute(task, ctx, error).await
    }
}
