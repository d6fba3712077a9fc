use std::sync::Arc;
use std::time::Duration;

use fleet_core::app::{DispatcherGroup, EngineBuilder, TaskManager};
use fleet_core::auth::{AccountInfo, AuthError};
use fleet_core::config::{QuotaConfig, SchedulingConfig};
use fleet_core::domain::{RegistryId, RegistryStatus};
use fleet_core::impls::{
    InMemoryTenantManager, MemoryAuditSink, MemoryStorage, QuotaAccountManagement,
};
use fleet_core::service::{FleetService, ServiceError};
use fleet_core::workers::FleetWorkers;

struct Stack {
    manager: Arc<TaskManager>,
    service: FleetService,
    tenants: Arc<InMemoryTenantManager>,
    audit: Arc<MemoryAuditSink>,
}

fn stack() -> Stack {
    let storage = Arc::new(MemoryStorage::new());
    let tenants = Arc::new(InMemoryTenantManager::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let workers = FleetWorkers::new(
        storage.clone(),
        &SchedulingConfig::default(),
        tenants.clone(),
        Arc::new(QuotaAccountManagement::new(QuotaConfig::default())),
        audit.clone(),
    );
    let manager = Arc::new(
        workers
            .register(EngineBuilder::new(storage))
            .unwrap()
            .build()
            .unwrap(),
    );
    let service = FleetService::new(Arc::clone(&manager), audit.clone());
    Stack {
        manager,
        service,
        tenants,
        audit,
    }
}

async fn wait_for<F: Fn(Option<RegistryStatus>) -> bool>(
    service: &FleetService,
    id: RegistryId,
    done: F,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = match service.get_registry(None, id).await {
                Ok(r) => Some(r.status),
                Err(ServiceError::RegistryNotFound(_)) => None,
                Err(e) => panic!("lookup failed: {e}"),
            };
            if done(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry reached the expected state in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registry_is_scheduled_provisioned_and_deleted() {
    let s = stack();
    let group = DispatcherGroup::spawn(2, Arc::clone(&s.manager), Duration::from_millis(5));
    let alice = AccountInfo::new("1", "alice");

    let t1 = s.service.create_deployment("t1", "http://t1").await.unwrap();
    let r = s.service.create_registry(&alice, "main").await.unwrap();
    wait_for(&s.service, r.id, |st| st == Some(RegistryStatus::Ready)).await;

    let ready = s.service.get_registry(Some(&alice), r.id).await.unwrap();
    assert_eq!(ready.deployment, Some(t1.id));
    assert!(ready.tenant_url.unwrap().starts_with("http://t1/t/"));
    assert_eq!(s.tenants.tenant_count(), 1);

    s.service.delete_registry(Some(&alice), r.id).await.unwrap();
    wait_for(&s.service, r.id, |st| st.is_none()).await;
    assert_eq!(s.tenants.tenant_count(), 0);
    assert!(
        s.audit
            .events()
            .iter()
            .any(|e| e.event_id == "registry_provisioned")
    );

    group.shutdown_and_join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registry_waits_for_capacity() {
    let s = stack();
    let group = DispatcherGroup::spawn(1, Arc::clone(&s.manager), Duration::from_millis(5));

    let r = s
        .service
        .create_registry(&AccountInfo::new("1", "alice"), "main")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        s.service.get_registry(None, r.id).await.unwrap().status,
        RegistryStatus::Requested
    );

    s.service.create_deployment("t1", "http://t1").await.unwrap();
    wait_for(&s.service, r.id, |st| st == Some(RegistryStatus::Ready)).await;

    group.shutdown_and_join().await;
}

#[tokio::test]
async fn cross_tenant_read_is_not_found() {
    let s = stack();
    let owner = AccountInfo::new("1", "alice").in_org("acme");
    let r = s.service.create_registry(&owner, "main").await.unwrap();

    let colleague = AccountInfo::new("2", "bob").in_org("acme");
    assert_eq!(
        s.service.get_registry(Some(&colleague), r.id).await.unwrap().id,
        r.id
    );

    let outsider = AccountInfo::new("3", "mallory").in_org("other");
    assert!(matches!(
        s.service.get_registry(Some(&outsider), r.id).await,
        Err(ServiceError::Auth(AuthError::NotFound(id))) if id == r.id
    ));
}

#[tokio::test]
async fn non_owner_read_is_denied_and_audited() {
    let s = stack();
    let r = s
        .service
        .create_registry(&AccountInfo::new("1", "alice"), "main")
        .await
        .unwrap();

    let result = s
        .service
        .get_registry(Some(&AccountInfo::new("2", "bob")), r.id)
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Auth(AuthError::NotAuthorized))
    ));
    let events = s.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, "authorization_failure");
    assert_eq!(events[0].data["operation"], "read");
}
