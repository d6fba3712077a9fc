//! ScheduleRegistryWorker - `Requested` の registry を deployment に割り当てる
//!
//! # フロー
//! ```text
//! registry が見えない ──retry()──▶ (再実行)
//! 空き deployment が無い ──retry_after(backoff)──▶ (再実行)
//! deployment を選択 ──▶ assign + Provisioning ──commit──▶ provisioning タスク
//! ```
//!
//! `finally_execute` は一度も割り当てられなかった（`Requested` のままの）
//! registry だけを削除する。`Provisioning` 以降の状態は後続タスクの持ち物で、
//! 回復が遅れて `Ready` → `Deleting` まで進んでいても触らない。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{RegistryStatus, StorageError, WorkerError};
use crate::policy::{DeploymentLoad, DeploymentSelector, RetryPolicy};
use crate::ports::{Storage, Transaction};
use crate::typed::{
    FinalizeContext, ProvisionRegistryTenantTask, ScheduleRegistryTask, Worker, WorkerContext,
};

pub struct ScheduleRegistryWorker {
    storage: Arc<dyn Storage>,
    selector: Arc<dyn DeploymentSelector>,
    no_capacity: RetryPolicy,
}

impl ScheduleRegistryWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        selector: Arc<dyn DeploymentSelector>,
        no_capacity: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            selector,
            no_capacity,
        }
    }
}

async fn deployment_load(tx: &mut dyn Transaction) -> Result<DeploymentLoad, StorageError> {
    let mut load = DeploymentLoad::new();
    for registry in tx.list_registries().await? {
        if let Some(deployment) = registry.deployment {
            *load.entry(deployment).or_default() += 1;
        }
    }
    Ok(load)
}

#[async_trait]
impl Worker<ScheduleRegistryTask> for ScheduleRegistryWorker {
    async fn execute(
        &self,
        task: ScheduleRegistryTask,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError> {
        let registry_id = task.registry_id;
        let Some(mut registry) = tx.get_registry(registry_id).await? else {
            // 作成したリクエストがまだ commit していない可能性がある
            debug!(registry_id = %registry_id, "registry not visible yet");
            return ctx.retry();
        };
        if registry.is_scheduled() {
            debug!(registry_id = %registry_id, "registry already scheduled");
            return Ok(());
        }

        let available = tx.list_available_deployments().await?;
        let load = if self.selector.uses_load() {
            deployment_load(tx).await?
        } else {
            DeploymentLoad::new()
        };
        let Some(target) = self.selector.select(&available, &load) else {
            let delay = self.no_capacity.next_delay(ctx.attempt());
            warn!(
                registry_id = %registry_id,
                ?delay,
                "no available deployment for registry; will check again"
            );
            return ctx.retry_after(delay);
        };

        registry.assign(target.id);
        tx.create_or_update_registry(registry).await?;
        ctx.chain(&ProvisionRegistryTenantTask { registry_id })?;

        info!(
            registry_id = %registry_id,
            deployment_id = %target.id,
            deployment = %target.name,
            "registry assigned to deployment"
        );
        Ok(())
    }

    async fn finally_execute(
        &self,
        task: ScheduleRegistryTask,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError> {
        let registry_id = task.registry_id;
        let mut tx = self.storage.begin().await?;
        let Some(registry) = tx.get_registry(registry_id).await? else {
            debug!(task_id = %ctx.task_id(), registry_id = %registry_id, "registry already gone");
            return Ok(());
        };
        if registry.deployment.is_some() || registry.status != RegistryStatus::Requested {
            return Ok(());
        }

        warn!(
            task_id = %ctx.task_id(),
            attempt = ctx.attempt(),
            registry_id = %registry_id,
            status = %registry.status,
            error = error.unwrap_or("none"),
            "registry was not scheduled; deleting it"
        );
        match tx.delete_registry(registry_id).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        Ok(())
    }
}
