//! ProvisionRegistryTenantWorker - 割り当て済み registry の tenant を作る
//!
//! 先に quota を予約する。business 上の拒否は終端。tenant 作成は registry id
//! に対して冪等なので、downstream 障害や commit conflict の後の retry も
//! 同じ tenant に収束する。
//!
//! `finally_execute` は `Ready` / `Deleting` の registry には触らない
//! （後続のタスクの持ち物）。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{RegistryStatus, WorkerError};
use crate::ports::{
    AccountManagement, AuditEvent, AuditSink, Storage, TenantManager, TenantRequest, Transaction,
};
use crate::typed::{FinalizeContext, ProvisionRegistryTenantTask, Worker, WorkerContext};

pub struct ProvisionRegistryTenantWorker {
    storage: Arc<dyn Storage>,
    tenants: Arc<dyn TenantManager>,
    accounts: Arc<dyn AccountManagement>,
    audit: Arc<dyn AuditSink>,
}

impl ProvisionRegistryTenantWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        tenants: Arc<dyn TenantManager>,
        accounts: Arc<dyn AccountManagement>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            storage,
            tenants,
            accounts,
            audit,
        }
    }
}

#[async_trait]
impl Worker<ProvisionRegistryTenantTask> for ProvisionRegistryTenantWorker {
    async fn execute(
        &self,
        task: ProvisionRegistryTenantTask,
        tx: &mut dyn Transaction,
        ctx: &mut WorkerContext,
    ) -> Result<(), WorkerError> {
        let registry_id = task.registry_id;
        let Some(mut registry) = tx.get_registry(registry_id).await? else {
            debug!(registry_id = %registry_id, "registry not visible yet");
            return ctx.retry();
        };
        if registry.status == RegistryStatus::Ready {
            return Ok(());
        }
        let Some(deployment_id) = registry.deployment else {
            return Err(WorkerError::Invariant(format!(
                "registry {registry_id} has no deployment to provision on"
            )));
        };
        let deployment = tx.get_deployment(deployment_id).await?.ok_or_else(|| {
            WorkerError::Invariant(format!("deployment {deployment_id} no longer exists"))
        })?;

        self.accounts.reserve(&registry).await?;
        let tenant = self
            .tenants
            .create_tenant(&deployment, TenantRequest::for_registry(&registry))
            .await?;

        registry.status = RegistryStatus::Ready;
        registry.tenant_url = Some(tenant.url.clone());
        let owner = registry.owner_id.clone();
        tx.create_or_update_registry(registry).await?;

        let audit = Arc::clone(&self.audit);
        ctx.delay(move || async move {
            audit.record(
                AuditEvent::new("registry_provisioned")
                    .with("registry", registry_id.to_string())
                    .with("owner", owner)
                    .with("tenant_url", tenant.url),
            );
            Ok(())
        });

        info!(registry_id = %registry_id, deployment_id = %deployment_id, "registry tenant provisioned");
        Ok(())
    }

    async fn finally_execute(
        &self,
        task: ProvisionRegistryTenantTask,
        ctx: &FinalizeContext,
        error: Option<&str>,
    ) -> Result<(), WorkerError> {
        let registry_id = task.registry_id;
        let mut tx = self.storage.begin().await?;
        let Some(mut registry) = tx.get_registry(registry_id).await? else {
            self.accounts.release(registry_id).await;
            return Ok(());
        };
        if matches!(
            registry.status,
            RegistryStatus::Ready | RegistryStatus::Deleting
        ) {
            return Ok(());
        }

        warn!(
            task_id = %ctx.task_id(),
            attempt = ctx.attempt(),
            registry_id = %registry_id,
            error = error.unwrap_or("none"),
            "provisioning did not complete; marking registry failed"
        );
        // 最後の commit だけが失敗した場合は tenant が残っている
        if let Some(deployment_id) = registry.deployment
            && let Some(deployment) = tx.get_deployment(deployment_id).await?
        {
            let tenant_id = TenantRequest::for_registry(&registry).tenant_id;
            self.tenants.delete_tenant(&deployment, &tenant_id).await?;
        }
        registry.status = RegistryStatus::Failed;
        tx.create_or_update_registry(registry).await?;
        tx.commit().await?;
        self.accounts.release(registry_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AttemptOutcome;
    use crate::domain::TaskStatus;
    use crate::policy::RetryPolicy;
    use crate::workers::testkit::Fleet;
    use std::time::Duration;

    #[tokio::test]
    async fn provisioning_makes_the_registry_ready() {
        let fleet = Fleet::new(RetryPolicy::default());
        let t1 = fleet.add_deployment("t1").await;
        let x = fleet.add_scheduled_registry("x", "alice", t1.id).await;
        fleet.provision(x.id).await;

        assert_eq!(fleet.dispatch().await.outcome, AttemptOutcome::Done);

        let x = fleet.registry(x.id).await.unwrap();
        assert_eq!(x.status, RegistryStatus::Ready);
        let tenant = fleet
            .tenants
            .tenant(t1.id, &x.id.as_ulid().to_string())
            .unwrap();
        assert_eq!(x.tenant_url, Some(tenant.url));

        let events = fleet.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "registry_provisioned");
    }

    #[tokio::test]
    async fn downstream_outage_is_retried() {
        let fleet = Fleet::new(RetryPolicy::fixed(Duration::from_secs(1)));
        let t1 = fleet.add_deployment("t1").await;
        let x = fleet.add_scheduled_registry("x", "alice", t1.id).await;
        fleet.provision(x.id).await;
        fleet.tenants.fail_next(1);

        assert!(matches!(
            fleet.dispatch().await.outcome,
            AttemptOutcome::Retrying { .. }
        ));
        assert!(fleet.audit.events().is_empty());

        fleet.clock.advance(Duration::from_secs(1));
        assert_eq!(fleet.dispatch().await.outcome, AttemptOutcome::Done);
        assert_eq!(fleet.tenants.tenant_count(), 1);
        assert_eq!(fleet.accounts.reserved_for("alice"), 1);
    }

    #[tokio::test]
    async fn quota_refusal_fails_and_marks_the_registry_failed() {
        let fleet = Fleet::with_quota_limit(RetryPolicy::default(), 0);
        let t1 = fleet.add_deployment("t1").await;
        let x = fleet.add_scheduled_registry("x", "alice", t1.id).await;
        let task_id = fleet.provision(x.id).await;

        match fleet.dispatch().await.outcome {
            AttemptOutcome::Failed { error } => {
                assert_eq!(error, "resource limit reached for registry")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let task = fleet.manager.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(
            fleet.registry(x.id).await.unwrap().status,
            RegistryStatus::Failed
        );
        assert_eq!(fleet.tenants.tenant_count(), 0);
    }

    #[tokio::test]
    async fn unassigned_registry_is_an_invariant_violation() {
        let fleet = Fleet::new(RetryPolicy::default());
        let x = fleet.add_registry("x", "alice").await;
        fleet.provision(x.id).await;

        match fleet.dispatch().await.outcome {
            AttemptOutcome::Failed { error } => assert!(error.starts_with("invariant violated")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            fleet.registry(x.id).await.unwrap().status,
            RegistryStatus::Failed
        );
    }
}
