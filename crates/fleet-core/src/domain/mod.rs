//! ドメインモデル（ID、タスク、fleet エンティティ、エラー）

pub mod errors;
pub mod fleet;
pub mod ids;
pub mod state;
pub mod task;

pub use self::errors::{BusinessError, EngineError, ErrorKind, StorageError, WorkerError};
pub use self::fleet::{DeploymentStatus, DeploymentTarget, RegistryInstance, RegistryStatus};
pub use self::ids::{DeploymentId, RegistryId, TaskId};
pub use self::state::TaskStatus;
pub use self::task::{Task, TaskRequest, TaskType, add_duration};
