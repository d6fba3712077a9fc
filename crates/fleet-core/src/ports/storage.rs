//! Storage port - fleet の状態とタスクの真実の源
//!
//! # Transaction
//! - 書き込みは `commit` まで他の transaction から見えない
//! - commit せずに drop すると書き込みはすべて捨てられる
//! - エンティティの `version` が保存値と一致しなければ
//!   `create_or_update_*` / `save_task` は `StorageError::Conflict`
//!
//! タスクは registry / deployment と同じストアに置く。worker の効果、
//! タスクの解決、chained タスクが原子的に commit される。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    DeploymentId, DeploymentTarget, RegistryId, RegistryInstance, StorageError, Task, TaskId,
};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError>;
}

#[async_trait]
pub trait Transaction: Send {
    // registries

    async fn get_registry(&mut self, id: RegistryId)
    -> Result<Option<RegistryInstance>, StorageError>;

    async fn list_registries(&mut self) -> Result<Vec<RegistryInstance>, StorageError>;

    /// insert（version 0）か update（version = 保存値）。新しい version を
    /// 持つエンティティを返す。
    async fn create_or_update_registry(
        &mut self,
        registry: RegistryInstance,
    ) -> Result<RegistryInstance, StorageError>;

    /// 無ければ `StorageError::NotFound`
    async fn delete_registry(&mut self, id: RegistryId) -> Result<(), StorageError>;

    // deployments

    async fn get_deployment(
        &mut self,
        id: DeploymentId,
    ) -> Result<Option<DeploymentTarget>, StorageError>;

    async fn list_deployments(&mut self) -> Result<Vec<DeploymentTarget>, StorageError>;

    async fn create_or_update_deployment(
        &mut self,
        deployment: DeploymentTarget,
    ) -> Result<DeploymentTarget, StorageError>;

    /// 現在 registry を受け付けている deployment。可用性は engine の外で
    /// 変わるので、毎回読み直しキャッシュしない。
    async fn list_available_deployments(&mut self) -> Result<Vec<DeploymentTarget>, StorageError> {
        Ok(self
            .list_deployments()
            .await?
            .into_iter()
            .filter(DeploymentTarget::is_available)
            .collect())
    }

    // tasks

    async fn get_task(&mut self, id: TaskId) -> Result<Option<Task>, StorageError>;

    /// id が既にあれば `StorageError::Conflict`
    async fn insert_task(&mut self, task: Task) -> Result<Task, StorageError>;

    /// `version` を条件にした更新。claim を lease にしているのはこれ
    async fn save_task(&mut self, task: Task) -> Result<Task, StorageError>;

    /// `now` で due かつ実行中でないタスクのうち、`(not_before, created_at, id)`
    /// が最小のもの。retry で戻ったタスクは先に due だった仕事の後ろに並ぶ。
    async fn next_due_task(&mut self, now: DateTime<Utc>) -> Result<Option<Task>, StorageError>;

    /// dispatch 可能なタスクの最も早い `not_before`（待機中の dispatcher 用）
    async fn next_wakeup(&mut self) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// `now` までに lease が切れた `Running` タスク
    async fn expired_leases(&mut self, now: DateTime<Utc>) -> Result<Vec<Task>, StorageError>;

    /// finalization 待ちの終端タスクのうち、持ち主の lease が切れたもの
    /// （持ち主が crash したか止まった）
    async fn unfinalized_with_expired_lease(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError>;

    async fn list_tasks(&mut self) -> Result<Vec<Task>, StorageError>;

    /// `before` より前に finalize されたタスクを削除し、件数を返す
    async fn purge_finalized(&mut self, before: DateTime<Utc>) -> Result<usize, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
