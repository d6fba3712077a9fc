//! Deployment の配置戦略
//!
//! - `RandomSelector`: 利用可能な target から一様に選ぶ
//! - `LeastLoadedSelector`: 割り当て済み registry が最も少ないもの（同数なら id 順）

use std::collections::HashMap;

use rand::seq::SliceRandom;

use crate::domain::{DeploymentId, DeploymentTarget};

/// deployment ごとの割り当て済み registry 数
pub type DeploymentLoad = HashMap<DeploymentId, usize>;

pub trait DeploymentSelector: Send + Sync {
    /// `candidates` から 1 つ選ぶ。`None` は `candidates` が空のときだけ
    fn select(
        &self,
        candidates: &[DeploymentTarget],
        load: &DeploymentLoad,
    ) -> Option<DeploymentTarget>;

    /// `select` が `load` を見るか。見ないなら呼び出し側は計算を省く
    fn uses_load(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl DeploymentSelector for RandomSelector {
    fn select(
        &self,
        candidates: &[DeploymentTarget],
        _load: &DeploymentLoad,
    ) -> Option<DeploymentTarget> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedSelector;

impl DeploymentSelector for LeastLoadedSelector {
    fn select(
        &self,
        candidates: &[DeploymentTarget],
        load: &DeploymentLoad,
    ) -> Option<DeploymentTarget> {
        candidates
            .iter()
            .min_by_key(|d| (load.get(&d.id).copied().unwrap_or(0), d.id))
            .cloned()
    }

    fn uses_load(&self) -> bool {
        true
    }
}
