//! EngineBuilder - task engine の明示的な組み立て
//!
//! # Fail-fast
//! - `expect_tasks()` でこのプロセスが処理すべきタスク種別を列挙
//! - `build()` で各種別をちょうど 1 つの worker が support するか確認
//! - `expect_tasks()` が無ければ登録済みの種別で確認する
//!   （`supports` の重なりはこれでも検出できる）

use std::sync::Arc;
use std::time::Duration;

use crate::app::manager::TaskManager;
use crate::config::EngineConfig;
use crate::domain::EngineError;
use crate::policy::RetryPolicy;
use crate::ports::{Clock, IdGenerator, Storage, SystemClock, UlidGenerator};
use crate::typed::{DynWorker, TaskPayload, Worker, WorkerRegistry};

/// # Example
/// ```ignore
/// let manager = EngineBuilder::new(storage.clone())
///     .register::<ScheduleRegistryTask, _>(ScheduleRegistryWorker::new(storage.clone()))?
///     .expect_tasks(&[ScheduleRegistryTask::TYPE])
///     .build()?;
/// ```
pub struct EngineBuilder {
    storage: Arc<dyn Storage>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    registry: WorkerRegistry,
    expected_tasks: Option<Vec<String>>,
    retry_policy: RetryPolicy,
    immediate_retry_delay: Duration,
    lease: Duration,
}

impl EngineBuilder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: None,
            ids: None,
            registry: WorkerRegistry::new(),
            expected_tasks: None,
            retry_policy: RetryPolicy::default(),
            immediate_retry_delay: Duration::from_millis(50),
            lease: Duration::from_secs(30),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// worker の `retry()` から再 dispatch までの最小間隔。
    /// retry し続けるタスクが dispatcher を占有しないための下限。
    pub fn immediate_retry_delay(mut self, delay: Duration) -> Self {
        self.immediate_retry_delay = delay;
        self
    }

    /// claim が有効な期間。過ぎると reaper が取り戻してよい。
    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// 設定から lease と retry 関連の値を取り込む
    pub fn engine_config(self, config: &EngineConfig) -> Self {
        self.lease_duration(config.lease())
            .retry_policy(config.retry_policy())
            .immediate_retry_delay(config.immediate_retry_delay())
    }

    pub fn register<T: TaskPayload, W: Worker<T> + 'static>(
        mut self,
        worker: W,
    ) -> Result<Self, EngineError> {
        self.registry.register::<T, W>(worker)?;
        Ok(self)
    }

    pub fn register_dyn(mut self, worker: Arc<dyn DynWorker>) -> Result<Self, EngineError> {
        self.registry.register_dyn(worker)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<TaskManager, EngineError> {
        let expected = match &self.expected_tasks {
            Some(expected) => expected.clone(),
            None => self.registry.registered_types(),
        };
        let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
        self.registry.validate(&expected)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(TaskManager::new(
            self.storage,
            Arc::new(self.registry),
            clock,
            ids,
            self.retry_policy,
            self.immediate_retry_delay,
            self.lease,
        ))
    }
}
