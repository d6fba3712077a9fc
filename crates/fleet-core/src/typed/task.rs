//! TaskPayload trait - payload 型とタスク種別タグを結び付ける

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{RegistryId, TaskRequest, TaskType};

/// 型付きタスク payload
///
/// # 例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct RotateCertificates {
///     deployment_id: DeploymentId,
/// }
///
/// impl TaskPayload for RotateCertificates {
///     const TYPE: &'static str = "fleet.deployment.rotate_certificates.v1";
/// }
/// ```
///
/// # 命名規則
/// - `{namespace}.{entity}.{action}.v{major}`
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn task_type() -> TaskType {
        TaskType::new(Self::TYPE)
    }

    /// `TaskManager::submit` が受け取る型無しリクエストに包む
    fn to_request(&self) -> Result<TaskRequest, serde_json::Error> {
        Ok(TaskRequest::new(Self::task_type(), serde_json::to_value(self)?))
    }
}

/// 新しく要求された registry を deployment に割り当てる
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRegistryTask {
    pub registry_id: RegistryId,
}

impl TaskPayload for ScheduleRegistryTask {
    const TYPE: &'static str = "fleet.registry.schedule.v1";
}

/// 割り当て済み registry の tenant を deployment 上に作る
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRegistryTenantTask {
    pub registry_id: RegistryId,
}

impl TaskPayload for ProvisionRegistryTenantTask {
    const TYPE: &'static str = "fleet.registry.provision_tenant.v1";
}

/// registry の tenant を撤去してレコードを削除する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionRegistryTask {
    pub registry_id: RegistryId,
}

impl TaskPayload for DeprovisionRegistryTask {
    const TYPE: &'static str = "fleet.registry.deprovision.v1";
}
