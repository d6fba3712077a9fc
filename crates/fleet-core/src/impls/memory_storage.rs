//! MemoryStorage - in-process transactional store for development and tests.
//!
//! # Isolation
//! - Each transaction buffers its writes in a private write set.
//! - Reads see committed state overlaid with the transaction's own writes.
//! - Every write checks the entity's `version` against what the transaction
//!   can see (fail fast), and `commit` re-validates against the committed
//!   state (first committer wins). Nothing is applied unless every check
//!   passes.
//! - A dropped transaction simply forgets its write set.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    DeploymentId, DeploymentTarget, RegistryId, RegistryInstance, StorageError, Task, TaskId,
};
use crate::ports::{Storage, Transaction};

/// Committed state shared by all transactions.
#[derive(Debug, Default, Clone)]
pub struct CommittedState {
    pub registries: HashMap<RegistryId, RegistryInstance>,
    pub deployments: HashMap<DeploymentId, DeploymentTarget>,
    pub tasks: HashMap<TaskId, Task>,
}

/// An entity kind stored in a versioned table.
trait Record: Clone + Send + Sync + 'static {
    type Key: Copy + Eq + Hash + Display + Send + Sync;
    const ENTITY: &'static str;

    fn key(&self) -> Self::Key;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn table(state: &CommittedState) -> &HashMap<Self::Key, Self>;
    fn table_mut(state: &mut CommittedState) -> &mut HashMap<Self::Key, Self>;
}

impl Record for RegistryInstance {
    type Key = RegistryId;
    const ENTITY: &'static str = "registry";

    fn key(&self) -> RegistryId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn table(state: &CommittedState) -> &HashMap<RegistryId, Self> {
        &state.registries
    }
    fn table_mut(state: &mut CommittedState) -> &mut HashMap<RegistryId, Self> {
        &mut state.registries
    }
}

impl Record for DeploymentTarget {
    type Key = DeploymentId;
    const ENTITY: &'static str = "deployment";

    fn key(&self) -> DeploymentId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn table(state: &CommittedState) -> &HashMap<DeploymentId, Self> {
        &state.deployments
    }
    fn table_mut(state: &mut CommittedState) -> &mut HashMap<DeploymentId, Self> {
        &mut state.deployments
    }
}

impl Record for Task {
    type Key = TaskId;
    const ENTITY: &'static str = "task";

    fn key(&self) -> TaskId {
        self.id()
    }
    fn version(&self) -> u64 {
        Task::version(self)
    }
    fn set_version(&mut self, version: u64) {
        Task::set_version(self, version);
    }
    fn table(state: &CommittedState) -> &HashMap<TaskId, Self> {
        &state.tasks
    }
    fn table_mut(state: &mut CommittedState) -> &mut HashMap<TaskId, Self> {
        &mut state.tasks
    }
}

enum Pending<T> {
    Put(T),
    Delete,
}

/// Buffered writes for one table.
struct WriteSet<T: Record> {
    /// Committed version seen when the key was first written (0 = absent).
    base: HashMap<T::Key, u64>,
    writes: HashMap<T::Key, Pending<T>>,
}

impl<T: Record> Default for WriteSet<T> {
    fn default() -> Self {
        Self {
            base: HashMap::new(),
            writes: HashMap::new(),
        }
    }
}

impl<T: Record> WriteSet<T> {
    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn visible(&self, state: &CommittedState, key: T::Key) -> Option<T> {
        match self.writes.get(&key) {
            Some(Pending::Put(value)) => Some(value.clone()),
            Some(Pending::Delete) => None,
            None => T::table(state).get(&key).cloned(),
        }
    }

    fn all_visible(&self, state: &CommittedState) -> Vec<T> {
        let mut out: Vec<T> = T::table(state)
            .iter()
            .filter(|(key, _)| !self.writes.contains_key(key))
            .map(|(_, value)| value.clone())
            .collect();
        out.extend(self.writes.values().filter_map(|pending| match pending {
            Pending::Put(value) => Some(value.clone()),
            Pending::Delete => None,
        }));
        out
    }

    fn remember_base(&mut self, state: &CommittedState, key: T::Key) {
        self.base
            .entry(key)
            .or_insert_with(|| T::table(state).get(&key).map_or(0, T::version));
    }

    fn put(&mut self, state: &CommittedState, mut value: T) -> Result<T, StorageError> {
        let key = value.key();
        let visible_version = self.visible(state, key).map_or(0, |v| v.version());
        if value.version() != visible_version {
            return Err(StorageError::conflict(T::ENTITY, key));
        }
        self.remember_base(state, key);
        value.set_version(visible_version + 1);
        self.writes.insert(key, Pending::Put(value.clone()));
        Ok(value)
    }

    fn delete(&mut self, state: &CommittedState, key: T::Key) -> Result<(), StorageError> {
        if self.visible(state, key).is_none() {
            return Err(StorageError::not_found(T::ENTITY, key));
        }
        self.remember_base(state, key);
        self.writes.insert(key, Pending::Delete);
        Ok(())
    }

    fn validate(&self, state: &CommittedState) -> Result<(), StorageError> {
        for (key, base) in &self.base {
            let committed = T::table(state).get(key).map_or(0, T::version);
            if committed != *base {
                return Err(StorageError::conflict(T::ENTITY, key));
            }
        }
        Ok(())
    }

    fn apply(self, state: &mut CommittedState) {
        let table = T::table_mut(state);
        for (key, pending) in self.writes {
            match pending {
                Pending::Put(value) => {
                    table.insert(key, value);
                }
                Pending::Delete => {
                    table.remove(&key);
                }
            }
        }
    }
}

/// Simulates another writer that commits right before this one.
#[cfg(test)]
pub(crate) type Interference = Box<dyn FnOnce(&mut CommittedState) + Send>;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<CommittedState>>,
    #[cfg(test)]
    interference: Arc<std::sync::Mutex<Vec<Interference>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> CommittedState {
        self.state.lock().await.clone()
    }

    /// Run `f` against committed state inside the next commit that writes a
    /// registry, before that commit is validated.
    #[cfg(test)]
    pub(crate) fn interfere_on_next_registry_commit(
        &self,
        f: impl FnOnce(&mut CommittedState) + Send + 'static,
    ) {
        self.interference
            .lock()
            .expect("interference lock")
            .push(Box::new(f));
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            registries: WriteSet::default(),
            deployments: WriteSet::default(),
            tasks: WriteSet::default(),
            #[cfg(test)]
            interference: Arc::clone(&self.interference),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<CommittedState>>,
    registries: WriteSet<RegistryInstance>,
    deployments: WriteSet<DeploymentTarget>,
    tasks: WriteSet<Task>,
    #[cfg(test)]
    interference: Arc<std::sync::Mutex<Vec<Interference>>>,
}

impl MemoryTransaction {
    async fn visible_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        self.tasks.all_visible(&state)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_registry(
        &mut self,
        id: RegistryId,
    ) -> Result<Option<RegistryInstance>, StorageError> {
        let state = self.state.lock().await;
        Ok(self.registries.visible(&state, id))
    }

    async fn list_registries(&mut self) -> Result<Vec<RegistryInstance>, StorageError> {
        let state = self.state.lock().await;
        let mut out = self.registries.all_visible(&state);
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn create_or_update_registry(
        &mut self,
        registry: RegistryInstance,
    ) -> Result<RegistryInstance, StorageError> {
        let state = self.state.lock().await;
        self.registries.put(&state, registry)
    }

    async fn delete_registry(&mut self, id: RegistryId) -> Result<(), StorageError> {
        let state = self.state.lock().await;
        self.registries.delete(&state, id)
    }

    async fn get_deployment(
        &mut self,
        id: DeploymentId,
    ) -> Result<Option<DeploymentTarget>, StorageError> {
        let state = self.state.lock().await;
        Ok(self.deployments.visible(&state, id))
    }

    async fn list_deployments(&mut self) -> Result<Vec<DeploymentTarget>, StorageError> {
        let state = self.state.lock().await;
        let mut out = self.deployments.all_visible(&state);
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    async fn create_or_update_deployment(
        &mut self,
        deployment: DeploymentTarget,
    ) -> Result<DeploymentTarget, StorageError> {
        let state = self.state.lock().await;
        self.deployments.put(&state, deployment)
    }

    async fn get_task(&mut self, id: TaskId) -> Result<Option<Task>, StorageError> {
        let state = self.state.lock().await;
        Ok(self.tasks.visible(&state, id))
    }

    async fn insert_task(&mut self, task: Task) -> Result<Task, StorageError> {
        let state = self.state.lock().await;
        if self.tasks.visible(&state, task.id()).is_some() || task.version() != 0 {
            return Err(StorageError::conflict("task", task.id()));
        }
        self.tasks.put(&state, task)
    }

    async fn save_task(&mut self, task: Task) -> Result<Task, StorageError> {
        let state = self.state.lock().await;
        self.tasks.put(&state, task)
    }

    async fn next_due_task(&mut self, now: DateTime<Utc>) -> Result<Option<Task>, StorageError> {
        Ok(self
            .visible_tasks()
            .await
            .into_iter()
            .filter(|t| t.is_due(now))
            .min_by_key(|t| (t.not_before(), t.created_at(), t.id())))
    }

    async fn next_wakeup(&mut self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .visible_tasks()
            .await
            .into_iter()
            .filter(|t| t.status().is_dispatchable())
            .map(|t| t.not_before())
            .min())
    }

    async fn expired_leases(&mut self, now: DateTime<Utc>) -> Result<Vec<Task>, StorageError> {
        let mut out: Vec<Task> = self
            .visible_tasks()
            .await
            .into_iter()
            .filter(|t| t.status() == crate::domain::TaskStatus::Running && !t.is_leased(now))
            .collect();
        out.sort_by_key(|t| (t.created_at(), t.id()));
        Ok(out)
    }

    async fn unfinalized_with_expired_lease(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        let mut out: Vec<Task> = self
            .visible_tasks()
            .await
            .into_iter()
            .filter(|t| t.needs_finalization() && !t.is_leased(now))
            .collect();
        out.sort_by_key(|t| (t.created_at(), t.id()));
        Ok(out)
    }

    async fn list_tasks(&mut self) -> Result<Vec<Task>, StorageError> {
        let mut out = self.visible_tasks().await;
        out.sort_by_key(|t| (t.created_at(), t.id()));
        Ok(out)
    }

    async fn purge_finalized(&mut self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        let state = self.state.lock().await;
        let expired: Vec<TaskId> = self
            .tasks
            .all_visible(&state)
            .into_iter()
            .filter(|t| t.finalized_at().is_some_and(|at| at < before))
            .map(|t| t.id())
            .collect();
        for id in &expired {
            self.tasks.delete(&state, *id)?;
        }
        Ok(expired.len())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        let mut state = this.state.lock().await;

        #[cfg(test)]
        if !this.registries.is_empty() {
            let hook = this.interference.lock().expect("interference lock").pop();
            if let Some(hook) = hook {
                hook(&mut state);
            }
        }

        if this.registries.is_empty() && this.deployments.is_empty() && this.tasks.is_empty() {
            return Ok(());
        }

        this.registries.validate(&state)?;
        this.deployments.validate(&state)?;
        this.tasks.validate(&state)?;

        this.registries.apply(&mut state);
        this.deployments.apply(&mut state);
        this.tasks.apply(&mut state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RegistryStatus, TaskRequest, TaskType};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry(name: &str) -> RegistryInstance {
        RegistryInstance::new(RegistryId::generate(), name, "alice", None, at(0))
    }

    fn task(created: i64) -> Task {
        Task::new(
            TaskId::generate(),
            TaskRequest::new(TaskType::new("test.v1"), json!({})),
            at(created),
        )
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_to_others() {
        let storage = MemoryStorage::new();
        let r = registry("r1");

        let mut tx1 = storage.begin().await.unwrap();
        tx1.create_or_update_registry(r.clone()).await.unwrap();
        assert!(tx1.get_registry(r.id).await.unwrap().is_some());

        let mut tx2 = storage.begin().await.unwrap();
        assert!(tx2.get_registry(r.id).await.unwrap().is_none());

        tx1.commit().await.unwrap();
        assert!(tx2.get_registry(r.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let storage = MemoryStorage::new();
        let r = registry("r1");

        {
            let mut tx = storage.begin().await.unwrap();
            tx.create_or_update_registry(r.clone()).await.unwrap();
        }

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.get_registry(r.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn versions_advance_on_each_committed_write() {
        let storage = MemoryStorage::new();

        let mut tx = storage.begin().await.unwrap();
        let saved = tx.create_or_update_registry(registry("r1")).await.unwrap();
        assert_eq!(saved.version, 1);
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let mut current = tx.get_registry(saved.id).await.unwrap().unwrap();
        current.status = RegistryStatus::Ready;
        let updated = tx.create_or_update_registry(current).await.unwrap();
        assert_eq!(updated.version, 2);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn stale_write_conflicts_immediately() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let saved = tx.create_or_update_registry(registry("r1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        let a = first.get_registry(saved.id).await.unwrap().unwrap();
        let b = second.get_registry(saved.id).await.unwrap().unwrap();

        first.create_or_update_registry(a).await.unwrap();
        first.commit().await.unwrap();

        let err = second.create_or_update_registry(b).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn first_committer_wins() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let saved = tx.create_or_update_registry(registry("r1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        let a = first.get_registry(saved.id).await.unwrap().unwrap();
        let b = second.get_registry(saved.id).await.unwrap().unwrap();
        first.create_or_update_registry(a).await.unwrap();
        second.create_or_update_registry(b).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let saved = tx.create_or_update_registry(registry("r1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut loser = storage.begin().await.unwrap();
        let stale = loser.get_registry(saved.id).await.unwrap().unwrap();
        let other = registry("r2");
        loser.create_or_update_registry(other.clone()).await.unwrap();
        loser.create_or_update_registry(stale).await.unwrap();

        let mut winner = storage.begin().await.unwrap();
        let fresh = winner.get_registry(saved.id).await.unwrap().unwrap();
        winner.create_or_update_registry(fresh).await.unwrap();
        winner.commit().await.unwrap();

        assert!(loser.commit().await.is_err());
        let snapshot = storage.snapshot().await;
        assert!(!snapshot.registries.contains_key(&other.id));
    }

    #[tokio::test]
    async fn delete_of_missing_registry_is_not_found() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();

        let err = tx.delete_registry(RegistryId::generate()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn available_deployments_are_filtered() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let up = DeploymentTarget::new(DeploymentId::generate(), "up", "http://up");
        let mut down = DeploymentTarget::new(DeploymentId::generate(), "down", "http://down");
        down.status = crate::domain::DeploymentStatus::Unavailable;
        tx.create_or_update_deployment(up.clone()).await.unwrap();
        tx.create_or_update_deployment(down).await.unwrap();

        let available = tx.list_available_deployments().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, up.id);
    }

    #[tokio::test]
    async fn next_due_task_is_oldest_created_and_skips_future_and_running() {
        let storage = MemoryStorage::new();
        let oldest = task(0);
        let newer = task(5);
        let mut future = task(1);
        future.not_before = at(100);
        let mut running = task(-10);
        running.start_attempt(at(0), Duration::from_secs(30));

        let mut tx = storage.begin().await.unwrap();
        for t in [newer.clone(), oldest.clone(), future, running] {
            tx.insert_task(t).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let due = tx.next_due_task(at(10)).await.unwrap().unwrap();
        assert_eq!(due.id(), oldest.id());
        assert_eq!(tx.next_wakeup().await.unwrap(), Some(at(0)));
    }

    #[tokio::test]
    async fn requeued_task_waits_behind_tasks_due_earlier() {
        let storage = MemoryStorage::new();
        let mut requeued = task(0);
        requeued.schedule_retry(at(8), at(8), None);
        let newer = task(5);

        let mut tx = storage.begin().await.unwrap();
        for t in [requeued.clone(), newer.clone()] {
            tx.insert_task(t).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let due = tx.next_due_task(at(10)).await.unwrap().unwrap();
        assert_eq!(due.id(), newer.id());
    }

    #[tokio::test]
    async fn claiming_the_same_task_twice_conflicts() {
        let storage = MemoryStorage::new();
        let t = task(0);
        let mut tx = storage.begin().await.unwrap();
        tx.insert_task(t.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut a = storage.begin().await.unwrap();
        let mut b = storage.begin().await.unwrap();
        let mut ta = a.next_due_task(at(0)).await.unwrap().unwrap();
        let mut tb = b.next_due_task(at(0)).await.unwrap().unwrap();
        ta.start_attempt(at(0), Duration::from_secs(30));
        tb.start_attempt(at(0), Duration::from_secs(30));
        a.save_task(ta).await.unwrap();
        b.save_task(tb).await.unwrap();

        a.commit().await.unwrap();
        assert!(b.commit().await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn purge_removes_only_old_finalized_tasks() {
        let storage = MemoryStorage::new();
        let mut old = task(0);
        old.mark_finalized(at(1), None);
        let mut recent = task(0);
        recent.mark_finalized(at(50), None);
        let open = task(0);

        let mut tx = storage.begin().await.unwrap();
        for t in [old.clone(), recent.clone(), open.clone()] {
            tx.insert_task(t).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.purge_finalized(at(10)).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let snapshot = storage.snapshot().await;
        assert!(!snapshot.tasks.contains_key(&old.id()));
        assert!(snapshot.tasks.contains_key(&recent.id()));
        assert!(snapshot.tasks.contains_key(&open.id()));
    }
}
