//! GCLoop - 保持期間を過ぎた archive 済みタスクを削除する

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::manager::TaskManager;

pub struct GCLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl GCLoop {
    pub fn spawn(manager: Arc<TaskManager>, interval: Duration, retention: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                match manager.purge(retention).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "archived tasks purged"),
                    Err(e) => error!(error = %e, "gc pass failed"),
                }
            }
        });
        Self { shutdown_tx, join }
    }

    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
