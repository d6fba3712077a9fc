//! DeprovisionRegistryWorker - registry の tenant とレコードを削除する
//!
//! レコードが既に無くても quota の予約は解放する。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{RegistryStatus, StorageError, WorkerError};
use crate::ports::{AccountManagement, Storage, TenantManager, TenantRequest, Transaction};
use crate::typed::{DeprovisionRegistryTask, FinalizeContext, Worker, WorkerContext};

pub struct DeprovisionRegistryWorker {
    storage: Arc<dyn Storage>,
    tenants: Arc<dyn TenantManager>,
    accounts: Arc<dyn AccountManagement>,
}

impl DeprovisionRegistryWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        tenants: Arc<dyn TenantManager>,
        accounts: Arc<dyn AccountManagement>,
    ) -> Self {
        Self {
            storage,
            tenants,
            accounts,
        }
    }
}

#[async_trait]
impl Worker<DeprovisionRegistryTask> for DeprovisionRegistryWorker {
    async fn execute(
        &self,
        task: DeprovisionRegistryTask,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError> {
        let registry_id = task.registry_id;
        let accounts = Arc::clone(&self.accounts);
        ctx.delay(move || async move {
            accounts.release(registry_id).await;
            Ok(())
        });

        let Some(registry) = tx.get_registry(registry_id).await? else {
            info!(registry_id = %registry_id, "registry already removed");
            return Ok(());
        };

        if let Some(deployment_id) = registry.deployment
            && let Some(deployment) = tx.get_deployment(deployment_id).await?
        {
            let tenant_id = TenantRequest::for_registry(&registry).tenant_id;
            self.tenants.delete_tenant(&deployment, &tenant_id).await?;
        }
        match tx.delete_registry(registry_id).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        info!(registry_id = %registry_id, "registry deprovisioned");
        Ok(())
    }

    async fn finally_execute(
        &self,
        task: DeprovisionRegistryTask,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError> {
        let Some(error) = error else {
            return Ok(());
        };
        let mut tx = self.storage.begin().await?;
        let Some(mut registry) = tx.get_registry(task.registry_id).await? else {
            return Ok(());
        };
        warn!(
            task_id = %ctx.task_id(),
            attempt = ctx.attempt(),
            registry_id = %task.registry_id,
            error,
            "deprovisioning failed; marking registry failed"
        );
        registry.status = RegistryStatus::Failed;
        tx.create_or_update_registry(registry).await?;
        tx.commit().await?;
        Ok(())
    }
}
