//! ReaperLoop - lease 切れと finalization の定期回復
//!
//! タイムアウトはベストエフォート。止まった attempt に気付くのは、進捗が
//! 止まってから最大で lease + reap 間隔の後。実行中の attempt を横取りは
//! しない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::manager::TaskManager;

pub struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub fn spawn(manager: Arc<TaskManager>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                match manager.reap().await {
                    Ok(report) if report.reclaimed + report.finalized > 0 => {
                        info!(
                            reclaimed = report.reclaimed,
                            finalized = report.finalized,
                            "reaper pass"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "reaper pass failed"),
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
