//! worker 本体が使う downstream サービス
//!
//! - `TenantManager`: deployment 上で registry の tenant を作成・削除
//! - `AccountManagement`: provisioning 前の quota と規約のチェック

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{BusinessError, DeploymentTarget, RegistryId, RegistryInstance, WorkerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRequest {
    pub tenant_id: String,
    pub owner_id: String,
    pub org_id: Option<String>,
}

impl TenantRequest {
    /// tenant id は registry id から導出するので、2 回作成しても downstream
    /// では何も起きない。
    pub fn for_registry(registry: &RegistryInstance) -> Self {
        Self {
            tenant_id: registry.id.as_ulid().to_string(),
            owner_id: registry.owner_id.clone(),
            org_id: registry.org_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub url: String,
}

#[async_trait]
pub trait TenantManager: Send + Sync {
    /// `tenant_id` に対して冪等。一時的な失敗は `WorkerError::Downstream`
    async fn create_tenant(
        &self,
        deployment: &DeploymentTarget,
        request: TenantRequest,
    ) -> Result<Tenant, WorkerError>;

    /// 存在しない tenant の削除も成功扱い
    async fn delete_tenant(
        &self,
        deployment: &DeploymentTarget,
        tenant_id: &str,
    ) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait AccountManagement: Send + Sync {
    /// `registry` の所有者のアカウントに枠を予約する
    async fn reserve(&self, registry: &RegistryInstance) -> Result<(), BusinessError>;

    /// 予約を返す。知らない registry は無視する
    async fn release(&self, registry: RegistryId);
}
