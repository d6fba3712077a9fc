//! DispatcherGroup - dispatch ループのプール
//!
//! # フロー
//! 1. `TaskManager::dispatch_next()` を繰り返し呼ぶ
//! 2. due なものが無ければ眠る。起きるのは次のいずれか最初のもの:
//!    - submit による wake
//!    - 次に分かっている `not_before`
//!    - poll 間隔

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::app::manager::TaskManager;

/// 実行中の dispatcher 群のハンドル
/// - `request_shutdown()` で新しい claim を止める
/// - 実行中の attempt は必ず最後まで走る
pub struct DispatcherGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DispatcherGroup {
    pub fn spawn(n: usize, manager: Arc<TaskManager>, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|dispatcher_id| {
                let manager = Arc::clone(&manager);
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    dispatch_loop(dispatcher_id, manager, poll_interval, &mut rx).await;
                })
            })
            .collect();

        info!(dispatchers = n, "dispatchers started");
        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // receiver は既にいないかもしれない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
        info!("dispatchers stopped");
    }
}

async fn dispatch_loop(
    dispatcher_id: usize,
    manager: Arc<TaskManager>,
    poll_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let wakeup = manager.wakeup();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 見る前に登録しておく。空チェックと待機の間の submit を取りこぼさない
        let notified = wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match manager.dispatch_next().await {
            Ok(Some(report)) => {
                debug!(dispatcher_id, task_id = %report.task_id, outcome = ?report.outcome, "attempt resolved");
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(dispatcher_id, error = %e, "dispatch failed"),
        }

        let idle = idle_for(&manager, poll_interval).await;
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = &mut notified => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
    debug!(dispatcher_id, "dispatcher exiting");
}

/// 次の `not_before` までの時間（上限 `poll_interval`）
async fn idle_for(manager: &TaskManager, poll_interval: Duration) -> Duration {
    match manager.next_wakeup().await {
        Ok(Some(at)) => (at - manager.clock().now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(poll_interval),
        _ => poll_interval,
    }
}
