//! FleetService - fleet のリクエスト側
//!
//! 状態変更は、それを先へ進めるタスクと一緒に 1 つの transaction で記録する。
//! 間で crash しても、後続作業の無い registry は残らない。

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::app::TaskManager;
use crate::auth::{AccountInfo, AuthError, with_read_permission};
use crate::domain::{
    DeploymentTarget, EngineError, RegistryId, RegistryInstance, RegistryStatus, StorageError,
};
use crate::ports::{AuditSink, Clock, IdGenerator};
use crate::typed::{DeprovisionRegistryTask, ScheduleRegistryTask, TaskPayload};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("registry {0} not found")]
    RegistryNotFound(RegistryId),

    #[error("registry {id} cannot be deleted while {status}")]
    InvalidState { id: RegistryId, status: RegistryStatus },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct FleetService {
    manager: Arc<TaskManager>,
    audit: Arc<dyn AuditSink>,
}

impl FleetService {
    pub fn new(manager: Arc<TaskManager>, audit: Arc<dyn AuditSink>) -> Self {
        Self { manager, audit }
    }

    /// `Requested` の registry と scheduling タスクを記録する
    pub async fn create_registry(
        &self,
        account: &AccountInfo,
        name: &str,
    ) -> Result<RegistryInstance, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "registry name must not be empty".to_string(),
            ));
        }
        let registry = RegistryInstance::new(
            self.manager.ids().generate_registry_id(),
            name,
            account.username.clone(),
            account.org_id.clone(),
            self.manager.clock().now(),
        );
        let schedule = ScheduleRegistryTask {
            registry_id: registry.id,
        };
        let request = schedule
            .to_request()
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

        let mut tx = self.manager.storage().begin().await?;
        let registry = tx.create_or_update_registry(registry).await?;
        self.manager.submit_in(tx.as_mut(), request).await?;
        tx.commit().await?;
        self.manager.wake();

        info!(registry_id = %registry.id, owner = %registry.owner_id, "registry requested");
        Ok(registry)
    }

    pub async fn get_registry(
        &self,
        identity: Option<&AccountInfo>,
        id: RegistryId,
    ) -> Result<RegistryInstance, ServiceError> {
        let storage = self.manager.storage().as_ref();
        with_read_permission(storage, self.audit.as_ref(), identity, id, move || async move {
            let mut tx = storage.begin().await?;
            tx.get_registry(id)
                .await?
                .ok_or(ServiceError::RegistryNotFound(id))
        })
        .await
    }

    /// registry を `Deleting` にして deprovision タスクに渡す。
    /// scheduling / provisioning 中の registry は拒否する。
    pub async fn delete_registry(
        &self,
        identity: Option<&AccountInfo>,
        id: RegistryId,
    ) -> Result<(), ServiceError> {
        let mut registry = self.get_registry(identity, id).await?;
        match registry.status {
            RegistryStatus::Ready | RegistryStatus::Failed => {}
            RegistryStatus::Deleting => return Ok(()),
            status => return Err(ServiceError::InvalidState { id, status }),
        }
        let request = DeprovisionRegistryTask { registry_id: id }
            .to_request()
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

        registry.status = RegistryStatus::Deleting;
        let mut tx = self.manager.storage().begin().await?;
        tx.create_or_update_registry(registry).await?;
        self.manager.submit_in(tx.as_mut(), request).await?;
        tx.commit().await?;
        self.manager.wake();

        info!(registry_id = %id, "registry deletion requested");
        Ok(())
    }

    pub async fn create_deployment(
        &self,
        name: &str,
        tenant_manager_url: &str,
    ) -> Result<DeploymentTarget, ServiceError> {
        if name.trim().is_empty() || tenant_manager_url.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "deployment name and tenant manager url are required".to_string(),
            ));
        }
        let deployment = DeploymentTarget::new(
            self.manager.ids().generate_deployment_id(),
            name,
            tenant_manager_url,
        );
        let mut tx = self.manager.storage().begin().await?;
        let deployment = tx.create_or_update_deployment(deployment).await?;
        tx.commit().await?;
        // 空き待ちの scheduling タスクが進めるようになる
        self.manager.wake();

        info!(deployment_id = %deployment.id, name = %deployment.name, "deployment added");
        Ok(deployment)
    }

    pub async fn list_deployments(&self) -> Result<Vec<DeploymentTarget>, ServiceError> {
        let mut tx = self.manager.storage().begin().await?;
        Ok(tx.list_deployments().await?)
    }
}
