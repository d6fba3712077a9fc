//! fleet - インメモリのアダプタで registry fleet engine をプロセス内で動かす
//!
//! deployment を 1 つ、registry を 1 つ作り、ready になるまで待つ。
//! 使い方: `fleet [CONFIG_FILE]`。設定は `FLEET__*` 環境変数からも読む。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use fleet_core::app::{DispatcherGroup, EngineBuilder, GCLoop, ReaperLoop};
use fleet_core::auth::AccountInfo;
use fleet_core::config::FleetConfig;
use fleet_core::domain::RegistryStatus;
use fleet_core::impls::{
    InMemoryTenantManager, MemoryStorage, QuotaAccountManagement, TracingAuditSink,
};
use fleet_core::observability::init_tracing;
use fleet_core::ports::{AuditSink, Storage};
use fleet_core::service::FleetService;
use fleet_core::workers::FleetWorkers;

const STATUS_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = FleetConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(config.log_format);

    // (A) adapters
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let workers = FleetWorkers::new(
        Arc::clone(&storage),
        &config.scheduling,
        Arc::new(InMemoryTenantManager::new()),
        Arc::new(QuotaAccountManagement::new(config.quota.clone())),
        Arc::clone(&audit),
    );

    // (B) engine。dispatcher を起動する前に recover
    let builder = EngineBuilder::new(Arc::clone(&storage)).engine_config(&config.engine);
    let manager = Arc::new(workers.register(builder)?.build()?);
    manager.recover().await?;

    let engine = &config.engine;
    let dispatchers =
        DispatcherGroup::spawn(engine.dispatchers, Arc::clone(&manager), engine.poll_interval());
    let reaper = ReaperLoop::spawn(Arc::clone(&manager), engine.reap_interval());
    let gc = GCLoop::spawn(Arc::clone(&manager), engine.gc_interval(), engine.retention());

    // (C) requests
    let service = FleetService::new(Arc::clone(&manager), audit);
    service
        .create_deployment("local", "http://localhost:8081")
        .await?;
    let account = AccountInfo::new("demo", "demo");
    let registry = service.create_registry(&account, "demo-registry").await?;

    // (D) registry が終端状態になるか ctrl-c まで待つ
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
            _ = tokio::time::sleep(STATUS_POLL) => {
                let current = service.get_registry(Some(&account), registry.id).await?;
                if matches!(current.status, RegistryStatus::Ready | RegistryStatus::Failed) {
                    println!("{}", serde_json::to_string_pretty(&current)?);
                    break;
                }
            }
        }
    }

    dispatchers.shutdown_and_join().await;
    reaper.shutdown_and_join().await;
    gc.shutdown_and_join().await;

    let counts = manager.counts().await?;
    info!(?counts, "engine stopped");
    Ok(())
}
