//! InMemoryTenantManager - deployment ごとの tenant manager サービスの代役

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{DeploymentId, DeploymentTarget, WorkerError};
use crate::ports::{Tenant, TenantManager, TenantRequest};

#[derive(Debug, Default)]
struct State {
    tenants: HashMap<(DeploymentId, String), Tenant>,
    /// downstream エラーで失敗させる残り回数
    failures: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryTenantManager {
    state: Mutex<State>,
}

impl InMemoryTenantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次の `n` 回の呼び出しを、サービスに届かないかのように失敗させる
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.failures = n;
        }
    }

    pub fn tenant(&self, deployment: DeploymentId, tenant_id: &str) -> Option<Tenant> {
        let state = self.state.lock().ok()?;
        state
            .tenants
            .get(&(deployment, tenant_id.to_string()))
            .cloned()
    }

    pub fn tenant_count(&self) -> usize {
        self.state.lock().map(|s| s.tenants.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, WorkerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| WorkerError::Downstream("tenant manager state poisoned".into()))?;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(WorkerError::Downstream("tenant manager unavailable".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl TenantManager for InMemoryTenantManager {
    async fn create_tenant(
        &self,
        deployment: &DeploymentTarget,
        request: TenantRequest,
    ) -> Result<Tenant, WorkerError> {
        let mut state = self.lock()?;
        let key = (deployment.id, request.tenant_id.clone());
        let tenant = state
            .tenants
            .entry(key)
            .or_insert_with(|| Tenant {
                url: format!(
                    "{}/t/{}",
                    deployment.tenant_manager_url.trim_end_matches('/'),
                    request.tenant_id
                ),
                tenant_id: request.tenant_id,
            })
            .clone();
        debug!(deployment = %deployment.id, tenant_id = %tenant.tenant_id, "tenant ensured");
        Ok(tenant)
    }

    async fn delete_tenant(
        &self,
        deployment: &DeploymentTarget,
        tenant_id: &str,
    ) -> Result<(), WorkerError> {
        let mut state = self.lock()?;
        state.tenants.remove(&(deployment.id, tenant_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> DeploymentTarget {
        DeploymentTarget::new(DeploymentId::generate(), "eu-1", "http://eu-1/")
    }

    fn request(id: &str) -> TenantRequest {
        TenantRequest {
            tenant_id: id.to_string(),
            owner_id: "alice".to_string(),
            org_id: None,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let manager = InMemoryTenantManager::new();
        let target = deployment();

        let first = manager.create_tenant(&target, request("t1")).await.unwrap();
        let second = manager.create_tenant(&target, request("t1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.url, "http://eu-1/t/t1");
        assert_eq!(manager.tenant_count(), 1);
    }

    #[tokio::test]
    async fn delete_of_unknown_tenant_succeeds() {
        let manager = InMemoryTenantManager::new();
        manager.delete_tenant(&deployment(), "ghost").await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_downstream_errors() {
        let manager = InMemoryTenantManager::new();
        let target = deployment();
        manager.fail_next(1);

        let err = manager.create_tenant(&target, request("t1")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Downstream(_)));
        assert!(manager.create_tenant(&target, request("t1")).await.is_ok());
    }
}
