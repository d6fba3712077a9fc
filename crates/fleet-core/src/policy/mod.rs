//! 差し替え可能なポリシー: retry の backoff と deployment の配置

pub mod retry;
pub mod selector;

pub use self::retry::RetryPolicy;
pub use self::selector::{DeploymentLoad, DeploymentSelector, LeastLoadedSelector, RandomSelector};
