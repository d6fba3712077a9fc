//! Configuration - ファイル + 環境変数の階層設定
//!
//! # ソース（後のものが優先）
//! 1. 組み込みの既定値（下の `Default` 実装）
//! 2. 任意の設定ファイル（形式は拡張子から: toml, yaml, json, ...）
//! 3. `FLEET__<SECTION>__<KEY>` 環境変数（例: `FLEET__ENGINE__DISPATCHERS=8`）
//!
//! 時間はすべてミリ秒。

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::EngineError;
use crate::observability::LogFormat;
use crate::policy::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub engine: EngineConfig,
    pub scheduling: SchedulingConfig,
    pub quota: QuotaConfig,
    pub log_format: LogFormat,
}

impl FleetConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dispatchers: usize,
    pub lease_ms: u64,
    pub poll_interval_ms: u64,
    pub reap_interval_ms: u64,
    pub gc_interval_ms: u64,
    pub retention_ms: u64,
    pub retry_base_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_ms: u64,
    pub max_attempts: Option<u32>,
    pub immediate_retry_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatchers: 4,
            lease_ms: 30_000,
            poll_interval_ms: 500,
            reap_interval_ms: 5_000,
            gc_interval_ms: 60_000,
            retention_ms: 24 * 60 * 60 * 1000,
            retry_base_ms: 2_000,
            retry_multiplier: 2.0,
            retry_max_ms: 300_000,
            max_attempts: None,
            immediate_retry_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn immediate_retry_delay(&self) -> Duration {
        Duration::from_millis(self.immediate_retry_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.retry_max_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// scheduling worker の registry 配置方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    #[default]
    Random,
    LeastLoaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub placement: PlacementStrategy,
    /// 空き deployment が無いときの最初の再確認までの待ち時間
    pub no_capacity_delay_ms: u64,
    pub no_capacity_max_delay_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            placement: PlacementStrategy::Random,
            no_capacity_delay_ms: 100,
            no_capacity_max_delay_ms: 60_000,
        }
    }
}

impl SchedulingConfig {
    pub fn no_capacity_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.no_capacity_delay_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(self.no_capacity_max_delay_ms),
            max_attempts: None,
        }
    }
}

/// `QuotaAccountManagement` が課す上限
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub max_registries_per_owner: usize,
    pub require_terms: bool,
    pub allow_eval_instances: bool,
    pub max_eval_instances_per_owner: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_registries_per_owner: 10,
            require_terms: false,
            allow_eval_instances: true,
            max_eval_instances_per_owner: 1,
        }
    }
}
