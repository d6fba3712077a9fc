//! WorkerRegistry - タスク種別 → worker の静的テーブル
//!
//! 起動時に 1 度だけ作り、後は読むだけ。`validate` は期待するタスク種別が
//! ちょうど 1 つの worker で処理されるかを確認する。設定ミスはタスクを
//! 置き去りにせず、起動時にプロセスを落とす。

use std::collections::HashMap;
use std::sync::Arc;

use super::task::TaskPayload;
use super::worker::{DynWorker, TypedWorker, Worker};
use crate::domain::{EngineError, TaskType};

#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn DynWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TaskPayload, W: Worker<T> + 'static>(
        &mut self,
        worker: W,
    ) -> Result<(), EngineError> {
        self.register_dyn(Arc::new(TypedWorker::<T, W>::new(worker)))
    }

    pub fn register_dyn(&mut self, worker: Arc<dyn DynWorker>) -> Result<(), EngineError> {
        let task_type = worker.task_type().as_str().to_string();
        if self.workers.contains_key(&task_type) {
            return Err(EngineError::DuplicateWorker(task_type));
        }
        self.workers.insert(task_type, worker);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn DynWorker>> {
        self.workers.get(task_type.as_str()).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.workers.keys().cloned().collect();
        types.sort();
        types
    }

    /// `expected` の各種別をちょうど 1 つの worker が support していること
    pub fn validate(&self, expected: &[&str]) -> Result<(), EngineError> {
        let mut missing = Vec::new();
        for name in expected {
            let task_type = TaskType::new(*name);
            let mut matching: Vec<String> = self
                .workers
                .values()
                .filter(|w| w.supports(&task_type))
                .map(|w| w.name().to_string())
                .collect();
            match matching.len() {
                0 => missing.push(name.to_string()),
                1 => {}
                _ => {
                    matching.sort();
                    return Err(EngineError::AmbiguousWorker {
                        task_type: name.to_string(),
                        workers: matching,
                    });
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::MissingWorkers(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkerError;
    use crate::ports::Transaction;
    use crate::typed::{FinalizeContext, WorkerContext};
    use crate::typed::worker::tests::{EchoTask, EchoWorker};
    use async_trait::async_trait;

    /// `test.*` をすべて引き受ける
    struct GreedyWorker;

    #[async_trait]
    impl DynWorker for GreedyWorker {
        fn name(&self) -> &str {
            "GreedyWorker"
        }

        fn task_type(&self) -> TaskType {
            TaskType::new("test.greedy.v1")
        }

        fn supports(&self, task_type: &TaskType) -> bool {
            task_type.as_str().starts_with("test.")
        }

        async fn execute_dyn(
            &self,
            _payload: &serde_json::Value,
            _tx: &mut dyn Transaction,
            _ctx: &mut WorkerContext,
        ) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn finally_execute_dyn(
            &self,
            _payload: &serde_json::Value,
            _ctx: &FinalizeContext,
            _error: Option<&str>,
        ) -> Result<(), WorkerError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = WorkerRegistry::new();
        registry.register::<EchoTask, _>(EchoWorker).unwrap();

        assert!(registry.get(&TaskType::new(EchoTask::TYPE)).is_some());
        assert!(registry.get(&TaskType::new("test.unknown.v1")).is_none());
        assert_eq!(registry.registered_types(), vec![EchoTask::TYPE.to_string()]);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = WorkerRegistry::new();
        registry.register::<EchoTask, _>(EchoWorker).unwrap();

        let result = registry.register::<EchoTask, _>(EchoWorker);
        assert!(matches!(result, Err(EngineError::DuplicateWorker(t)) if t == EchoTask::TYPE));
    }

    #[test]
    fn validate_reports_missing_types() {
        let mut registry = WorkerRegistry::new();
        registry.register::<EchoTask, _>(EchoWorker).unwrap();

        assert!(registry.validate(&[EchoTask::TYPE]).is_ok());
        let err = registry
            .validate(&[EchoTask::TYPE, "fleet.absent.v1"])
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingWorkers(m) if m == vec!["fleet.absent.v1"]));
    }

    #[test]
    fn validate_reports_ambiguous_types() {
        let mut registry = WorkerRegistry::new();
        registry.register::<EchoTask, _>(EchoWorker).unwrap();
        registry.register_dyn(Arc::new(GreedyWorker)).unwrap();

        let err = registry.validate(&[EchoTask::TYPE]).unwrap_err();
        match err {
            EngineError::AmbiguousWorker { task_type, workers } => {
                assert_eq!(task_type, EchoTask::TYPE);
                assert_eq!(workers.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
