//! Workers - registry ライフサイクルのタスク本体
//!
//! - **ScheduleRegistryWorker**: deployment を選び、provisioning を chain
//! - **ProvisionRegistryTenantWorker**: quota + tenant、registry を `Ready` に
//! - **DeprovisionRegistryWorker**: tenant とレコードの削除

pub mod deprovision;
pub mod provision;
pub mod schedule;

use std::sync::Arc;

pub use self::deprovision::DeprovisionRegistryWorker;
pub use self::provision::ProvisionRegistryTenantWorker;
pub use self::schedule::ScheduleRegistryWorker;

use crate::app::EngineBuilder;
use crate::config::{PlacementStrategy, SchedulingConfig};
use crate::domain::EngineError;
use crate::policy::{DeploymentSelector, LeastLoadedSelector, RandomSelector, RetryPolicy};
use crate::ports::{AccountManagement, AuditSink, Storage, TenantManager};
use crate::typed::{
    DeprovisionRegistryTask, ProvisionRegistryTenantTask, ScheduleRegistryTask, TaskPayload,
};

/// fleet プロセスが実行できなければならないタスク種別
pub const FLEET_TASK_TYPES: [&str; 3] = [
    ScheduleRegistryTask::TYPE,
    ProvisionRegistryTenantTask::TYPE,
    DeprovisionRegistryTask::TYPE,
];

/// fleet worker が共有する依存
#[derive(Clone)]
pub struct FleetWorkers {
    pub storage: Arc<dyn Storage>,
    pub selector: Arc<dyn DeploymentSelector>,
    pub no_capacity: RetryPolicy,
    pub tenants: Arc<dyn TenantManager>,
    pub accounts: Arc<dyn AccountManagement>,
    pub audit: Arc<dyn AuditSink>,
}

impl FleetWorkers {
    pub fn new(
        storage: Arc<dyn Storage>,
        scheduling: &SchedulingConfig,
        tenants: Arc<dyn TenantManager>,
        accounts: Arc<dyn AccountManagement>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let selector: Arc<dyn DeploymentSelector> = match scheduling.placement {
            PlacementStrategy::Random => Arc::new(RandomSelector),
            PlacementStrategy::LeastLoaded => Arc::new(LeastLoadedSelector),
        };
        Self {
            storage,
            selector,
            no_capacity: scheduling.no_capacity_policy(),
            tenants,
            accounts,
            audit,
        }
    }

    /// fleet worker をすべて登録し、全 fleet タスク種別を期待する
    pub fn register(self, builder: EngineBuilder) -> Result<EngineBuilder, EngineError> {
        Ok(builder
            .register::<ScheduleRegistryTask, _>(ScheduleRegistryWorker::new(
                Arc::clone(&self.storage),
                self.selector,
                self.no_capacity,
            ))?
            .register::<ProvisionRegistryTenantTask, _>(ProvisionRegistryTenantWorker::new(
                Arc::clone(&self.storage),
                Arc::clone(&self.tenants),
                Arc::clone(&self.accounts),
                self.audit,
            ))?
            .register::<DeprovisionRegistryTask, _>(DeprovisionRegistryWorker::new(
                self.storage,
                self.tenants,
                self.accounts,
            ))?
            .expect_tasks(&FLEET_TASK_TYPES))
    }
}
